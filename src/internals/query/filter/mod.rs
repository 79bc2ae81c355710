//! Defines the archetype layout filters and the per-execution chunk filter of
//! [queries](super::Query).

use crate::internals::storage::{
    chunk::{is_newer, Chunk, Version},
    component::ComponentTypeId,
    shared::SharedValueIndex,
};
use smallvec::SmallVec;

/// The maximum number of shared component values a query filter may require.
pub const MAX_SHARED_FILTERS: usize = 2;

/// The maximum number of component change checks a query filter may hold.
pub const MAX_CHANGED_FILTERS: usize = 2;

/// Indicates if an an archetype should be accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// The filter has made a decision, `true` for accept, `false` for reject.
    Match(bool),
    /// The filter has not made a decision, defer to other filters.
    Defer,
}

impl FilterResult {
    /// Combines the result with a logical and operator.
    #[inline]
    pub fn coalesce_and(self, other: Self) -> Self {
        match self {
            Self::Match(success) => {
                match other {
                    Self::Match(other_success) => Self::Match(success && other_success),
                    Self::Defer => Self::Match(success),
                }
            }
            Self::Defer => other,
        }
    }

    /// Combines the result with a logical or operator.
    #[inline]
    pub fn coalesce_or(self, other: Self) -> Self {
        match self {
            Self::Match(success) => {
                match other {
                    Self::Match(other_success) => Self::Match(success || other_success),
                    Self::Defer => Self::Match(success),
                }
            }
            Self::Defer => other,
        }
    }

    /// Returns `true` if the archetype should be accepted.
    #[inline]
    pub fn is_pass(&self) -> bool {
        match self {
            Self::Match(success) => *success,
            Self::Defer => true,
        }
    }
}

impl std::ops::BitOr<FilterResult> for FilterResult {
    type Output = FilterResult;
    fn bitor(self, other: FilterResult) -> Self::Output {
        self.coalesce_or(other)
    }
}

impl std::ops::BitAnd<FilterResult> for FilterResult {
    type Output = FilterResult;
    fn bitand(self, other: FilterResult) -> Self::Output {
        self.coalesce_and(other)
    }
}

/// A filter which selects based upon which component types are attached to an entity.
///
/// These filters should be idempotent and immutable.
pub trait LayoutFilter {
    /// Calculates the filter's result for the given entity layout.
    fn matches_layout(&self, components: &[ComponentTypeId]) -> FilterResult;
}

/// Requires a chunk's shared component to hold a specific value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedFilter {
    pub(crate) type_id: ComponentTypeId,
    /// `None` when the value has never been stored in the world, which no chunk can match.
    pub(crate) value: Option<SharedValueIndex>,
}

/// The run-time part of a query, evaluated per chunk.
///
/// All shared value requirements must hold. When change checks are present, a chunk passes if
/// any checked column (or, when order dependent, the chunk's row order) changed after `since`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub(crate) shared: SmallVec<[SharedFilter; MAX_SHARED_FILTERS]>,
    pub(crate) changed: SmallVec<[ComponentTypeId; MAX_CHANGED_FILTERS]>,
    pub(crate) since: Version,
    pub(crate) order_dependent: bool,
}

impl Filter {
    /// Returns `true` if the filter can reject chunks.
    pub fn is_active(&self) -> bool {
        !self.shared.is_empty() || !self.changed.is_empty() || self.order_dependent
    }

    /// Returns the version change checks compare against.
    pub fn since(&self) -> Version {
        self.since
    }

    /// Returns the component types whose changes are checked.
    pub fn changed(&self) -> &[ComponentTypeId] {
        &self.changed
    }

    /// Returns `true` if the chunk passes the shared value and change checks.
    pub fn matches_chunk(&self, chunk: &Chunk) -> bool {
        self.matches_shared(chunk) && self.matches_changes(chunk)
    }

    fn matches_shared(&self, chunk: &Chunk) -> bool {
        self.shared.iter().all(|filter| {
            let slot = chunk
                .schema()
                .field(filter.type_id)
                .and_then(|field| field.shared_slot());
            match (slot, filter.value) {
                (Some(slot), Some(value)) => chunk.shared_values()[slot] == value,
                _ => false,
            }
        })
    }

    fn matches_changes(&self, chunk: &Chunk) -> bool {
        if self.changed.is_empty() && !self.order_dependent {
            return true;
        }

        let column_changed = self.changed.iter().any(|type_id| {
            chunk
                .schema()
                .field_index(*type_id)
                .map(|field| is_newer(chunk.version(field), self.since))
                .unwrap_or(false)
        });

        column_changed || (self.order_dependent && is_newer(chunk.order_version(), self.since))
    }
}
