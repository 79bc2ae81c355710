use tessera::*;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Pos(f32);
#[derive(Clone, Copy, Debug, PartialEq)]
struct Active;
#[derive(Clone, Copy, Debug, PartialEq)]
struct Visible;
#[derive(Clone, Copy, Debug, PartialEq)]
struct Extra(u8);

fn enableable_world() -> World {
    let mut world = World::default();
    world.registry_mut().register_enableable::<Active>().unwrap();
    world.registry_mut().register_enableable::<Visible>().unwrap();
    world
}

fn ranges(query: &Query, world: &World) -> Vec<std::ops::Range<usize>> {
    query.iter_chunks(world).map(|chunk| chunk.range()).collect()
}

#[test]
fn disabled_rows_are_skipped() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    let entities = world
        .extend((0..128).map(|i| (Pos(i as f32), Active)))
        .to_vec();
    for entity in &entities[64..] {
        assert_eq!(world.set_enabled::<Active>(*entity, false), Ok(true));
    }

    let query = world
        .compile_query(&QueryDesc::new().read::<Pos>().read::<Active>())
        .unwrap();
    assert_eq!(ranges(&query, &world), vec![0..64]);
    assert_eq!(query.count(&world), 64);
    assert_eq!(query.to_entities(&world), entities[..64].to_vec());

    // queries which do not mention the component see every row
    let unrelated = world
        .compile_query(&QueryDesc::new().read::<Pos>())
        .unwrap();
    assert_eq!(ranges(&unrelated, &world), vec![0..128]);
}

#[test]
fn partially_enabled_chunks_yield_each_run() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    let entities = world.extend((0..10).map(|_| (Pos(0.), Active))).to_vec();
    for row in &[0usize, 3, 4, 9] {
        world.set_enabled::<Active>(entities[*row], false).unwrap();
    }

    let query = world
        .compile_query(&QueryDesc::new().read::<Active>())
        .unwrap();
    assert_eq!(ranges(&query, &world), vec![1..3, 5..9]);

    // chunk lists contain the chunk once
    assert_eq!(query.chunk_list(&world).len(), 1);

    let ignoring = world
        .compile_query(&QueryDesc::new().read::<Active>().with_options(QueryOptions {
            ignore_enabled_state: true,
            ..Default::default()
        }))
        .unwrap();
    assert_eq!(ranges(&ignoring, &world), vec![0..10]);
}

#[test]
fn fully_disabled_chunks_are_skipped() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    let entities = world.extend((0..5).map(|_| (Pos(0.), Active))).to_vec();
    for entity in &entities {
        world.set_enabled::<Active>(*entity, false).unwrap();
    }

    let query = world
        .compile_query(&QueryDesc::new().read::<Active>())
        .unwrap();
    assert!(query.is_empty(&world));
    assert!(query.chunk_list(&world).is_empty());
}

#[test]
fn toggling_back_restores_the_chunk() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    let entities = world.extend((0..20).map(|_| (Pos(0.), Active))).to_vec();
    let query = world
        .compile_query(&QueryDesc::new().write::<Active>())
        .unwrap();

    assert_eq!(world.set_enabled::<Active>(entities[7], false), Ok(true));
    assert_eq!(world.set_enabled::<Active>(entities[7], false), Ok(false));
    assert_eq!(world.is_enabled::<Active>(entities[7]), Ok(false));
    assert_eq!(ranges(&query, &world), vec![0..7, 8..20]);

    assert_eq!(world.set_enabled::<Active>(entities[7], true), Ok(true));
    assert_eq!(ranges(&query, &world), vec![0..20]);
    for chunk in query.iter_chunks(&world) {
        assert_eq!(chunk.enabled::<Active>().unwrap().disabled_count(), 0);
    }
}

#[test]
fn disabled_count_follows_removals() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    let entities = world.extend((0..4).map(|i| (Pos(i as f32), Active))).to_vec();
    world.set_enabled::<Active>(entities[0], false).unwrap();
    world.set_enabled::<Active>(entities[2], false).unwrap();

    let query = world
        .compile_query(&QueryDesc::new().read::<Active>())
        .unwrap();
    let disabled = |world: &World| -> usize {
        query
            .iter_chunks(world)
            .next()
            .and_then(|chunk| chunk.enabled::<Active>().map(|bits| bits.disabled_count()))
            .unwrap_or(0)
    };
    assert_eq!(disabled(&world), 2);

    // the last row (enabled) moves into the removed disabled row
    world.despawn(entities[0]);
    assert_eq!(disabled(&world), 1);
    assert_eq!(world.is_enabled::<Active>(entities[3]), Ok(true));
    assert_eq!(world.is_enabled::<Active>(entities[2]), Ok(false));

    // the last row (disabled) moves into a removed enabled row
    world.despawn(entities[1]);
    assert_eq!(disabled(&world), 1);
    assert_eq!(world.is_enabled::<Active>(entities[2]), Ok(false));
    assert_eq!(query.to_entities(&world), vec![entities[3]]);
}

#[test]
fn removing_a_disabled_last_row_resets_its_slot() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    let a = world.spawn((Pos(0.), Active));
    let b = world.spawn((Pos(1.), Active));
    world.set_enabled::<Active>(b, false).unwrap();
    assert!(world.despawn(b));

    // the new entity reuses b's row and must start enabled
    let c = world.spawn((Pos(2.), Active));
    assert_eq!(world.location(c).unwrap().row(), 1);
    assert_eq!(world.is_enabled::<Active>(c), Ok(true));

    let query = world
        .compile_query(&QueryDesc::new().read::<Active>())
        .unwrap();
    assert_eq!(query.to_entities(&world), vec![a, c]);
    for chunk in query.iter_chunks(&world) {
        assert_eq!(chunk.enabled::<Active>().unwrap().disabled_count(), 0);
    }

    world.set_enabled::<Active>(a, false).unwrap();
    assert_eq!(query.count(&world), 1);
    world.set_enabled::<Active>(a, true).unwrap();
    assert_eq!(query.count(&world), 2);
}

#[test]
fn enabled_state_survives_archetype_moves() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    let a = world.spawn((Pos(0.), Active));
    let b = world.spawn((Pos(1.), Active));
    world.set_enabled::<Active>(a, false).unwrap();

    world.add_component(a, Extra(1)).unwrap();
    assert_eq!(world.is_enabled::<Active>(a), Ok(false));
    assert_eq!(world.is_enabled::<Active>(b), Ok(true));

    world.remove_component::<Pos>(a).unwrap();
    assert_eq!(world.is_enabled::<Active>(a), Ok(false));

    let query = world
        .compile_query(&QueryDesc::new().read::<Active>())
        .unwrap();
    assert_eq!(query.to_entities(&world), vec![b]);
}

#[test]
fn any_components_need_one_enabled() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    let entities = world
        .extend((0..4).map(|_| (Pos(0.), Active, Visible)))
        .to_vec();
    // row 0: both disabled, row 1: only Active disabled, row 2: only Visible disabled
    world.set_enabled::<Active>(entities[0], false).unwrap();
    world.set_enabled::<Visible>(entities[0], false).unwrap();
    world.set_enabled::<Active>(entities[1], false).unwrap();
    world.set_enabled::<Visible>(entities[2], false).unwrap();

    let any = world
        .compile_query(
            &QueryDesc::new()
                .read::<Pos>()
                .any_read::<Active>()
                .any_read::<Visible>(),
        )
        .unwrap();
    assert_eq!(ranges(&any, &world), vec![1..4]);

    let all = world
        .compile_query(&QueryDesc::new().read::<Active>().read::<Visible>())
        .unwrap();
    assert_eq!(ranges(&all, &world), vec![3..4]);
}

#[test]
fn non_enableable_components_are_always_enabled() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    let entity = world.spawn((Pos(0.),));
    assert_eq!(world.is_enabled::<Pos>(entity), Ok(true));
    assert_eq!(
        world.is_enabled::<Active>(entity),
        Err(EntityAccessError::ComponentNotFound)
    );
}

#[test]
#[should_panic(expected = "is not enableable")]
fn toggling_plain_components_panics() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = World::default();
    let entity = world.spawn((Pos(0.),));
    let _ = world.set_enabled::<Pos>(entity, false);
}

#[test]
#[should_panic(expected = "query does not have write access")]
fn toggling_through_views_requires_write_access() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    world.spawn((Pos(0.), Active));
    let query = world
        .compile_query(&QueryDesc::new().read::<Active>())
        .unwrap();
    for chunk in query.iter_chunks(&world) {
        let _ = chunk.enabled_mut::<Active>();
    }
}

#[cfg(feature = "parallel")]
#[test]
fn concurrent_toggles_keep_counts_exact() {
    use rayon::prelude::*;

    let _ = tracing_subscriber::fmt::try_init();

    let mut world = enableable_world();
    world.extend((0..128).map(|_| (Pos(0.), Active)));
    let query = world
        .compile_query(&QueryDesc::new().write::<Active>())
        .unwrap();

    let list = query.chunk_list(&world);
    assert_eq!(list.len(), 1);
    let chunk = query.chunk(&world, &list.as_slice()[0]).unwrap();
    let bits = chunk.enabled_mut::<Active>().unwrap();

    (0..128usize).into_par_iter().for_each(|row| {
        let mut handle = bits.get_mut(row).unwrap();
        handle.set_enabled(row % 2 == 0);
        handle.set_enabled(row % 4 != 1);
    });
    assert_eq!(bits.disabled_count(), 32);

    (0..128usize).into_par_iter().for_each(|row| {
        bits.get_mut(row).unwrap().set_enabled(true);
    });
    assert_eq!(bits.disabled_count(), 0);
    assert_eq!(bits.mask(), u128::MAX);
}
