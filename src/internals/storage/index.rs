//! An index of archetype layouts used to accelerate query evaluation.

use super::{archetype::ArchetypeIndex, component::ComponentTypeId, slicevec::SliceVec};
use crate::internals::query::filter::LayoutFilter;

/// An index of archetype layouts used to accelerate query evaluation.
///
/// Each entry holds the sorted component types of the archetype with the same index.
#[derive(Default, Debug)]
pub struct SearchIndex {
    component_layouts: SliceVec<ComponentTypeId>,
}

impl SearchIndex {
    pub(crate) fn push(&mut self, component_types: &[ComponentTypeId]) {
        self.component_layouts
            .push(component_types.iter().copied());
    }

    /// Returns the number of indexed archetypes.
    pub fn len(&self) -> usize {
        self.component_layouts.len()
    }

    /// Returns `true` if no archetypes have been indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the component types of an archetype.
    pub fn layout(&self, archetype: ArchetypeIndex) -> Option<&[ComponentTypeId]> {
        self.component_layouts.get(archetype.0 as usize)
    }

    /// Returns an iterator over archetype indexes for archetypes which match the given layout filter,
    /// starting from the given index.
    pub fn search_from<'a, F: LayoutFilter + ?Sized>(
        &'a self,
        filter: &'a F,
        start: usize,
    ) -> impl Iterator<Item = ArchetypeIndex> + 'a {
        self.component_layouts
            .iter_from(start)
            .enumerate()
            .filter(move |(_, components)| filter.matches_layout(components).is_pass())
            .map(move |(i, _)| ArchetypeIndex((i + start) as u32))
    }

    /// Returns an iterator over archetype indexes for archetypes which match the given layout filter.
    pub fn search<'a, F: LayoutFilter + ?Sized>(
        &'a self,
        filter: &'a F,
    ) -> impl Iterator<Item = ArchetypeIndex> + 'a {
        self.search_from(filter, 0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::internals::query::filter::FilterResult;

    struct Requires(ComponentTypeId);

    impl LayoutFilter for Requires {
        fn matches_layout(&self, components: &[ComponentTypeId]) -> FilterResult {
            FilterResult::Match(components.contains(&self.0))
        }
    }

    #[test]
    fn search_resumes_from_index() {
        let a = ComponentTypeId::of::<u8>();
        let b = ComponentTypeId::of::<u16>();

        let mut index = SearchIndex::default();
        index.push(&[a]);
        index.push(&[b]);
        index.push(&[a, b]);

        let filter = Requires(a);
        let all: Vec<_> = index.search(&filter).collect();
        assert_eq!(all, vec![ArchetypeIndex(0), ArchetypeIndex(2)]);

        let tail: Vec<_> = index.search_from(&filter, 1).collect();
        assert_eq!(tail, vec![ArchetypeIndex(2)]);
        assert_eq!(index.layout(ArchetypeIndex(1)), Some(&[b][..]));
    }
}
