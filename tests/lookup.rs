use tessera::*;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Health(u32);
#[derive(Clone, Copy, Debug, PartialEq)]
struct Armor(u32);
#[derive(Clone, Copy, Debug, PartialEq)]
struct Shielded;

#[test]
fn lookups_follow_entities_across_archetypes() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = World::default();
    let entities = world.extend((0..10).map(|i| (Health(i),))).to_vec();
    let armored = world
        .extend((10..20).map(|i| (Health(i), Armor(i))))
        .to_vec();

    let lookup = world.lookup::<Health>();
    for (i, entity) in entities.iter().chain(armored.iter()).enumerate() {
        assert!(lookup.has(*entity));
        assert_eq!(*lookup.get(*entity).unwrap(), Health(i as u32));
    }

    let armor = world.lookup::<Armor>();
    assert!(!armor.has(entities[0]));
    assert_eq!(
        armor.get(entities[0]).unwrap_err(),
        EntityAccessError::ComponentNotFound
    );
    assert_eq!(*armor.get(armored[3]).unwrap(), Armor(13));
}

#[test]
fn stale_entities_are_rejected() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = World::default();
    let a = world.spawn((Health(1),));
    world.despawn(a);
    let b = world.spawn((Health(2),));

    let lookup = world.lookup_mut::<Health>();
    assert_eq!(lookup.get(a).unwrap_err(), EntityAccessError::EntityNotFound);
    assert_eq!(
        lookup.get_mut(a).unwrap_err(),
        EntityAccessError::EntityNotFound
    );
    assert_eq!(*lookup.get(b).unwrap(), Health(2));
}

#[test]
fn lookups_see_structural_changes() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = World::default();
    let entity = world.spawn((Health(5),));
    let other = world.spawn((Health(6),));

    assert_eq!(*world.lookup::<Health>().get(entity).unwrap(), Health(5));

    world.add_component(entity, Armor(1)).unwrap();
    world.despawn(other);
    let lookup = world.lookup::<Health>();
    assert_eq!(*lookup.get(entity).unwrap(), Health(5));
    assert!(!lookup.has(other));
}

#[test]
fn mutable_lookups_write_through() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = World::default();
    let entities = world
        .extend((0..5).map(|i| (Health(i), Armor(0))))
        .to_vec();

    let lookup = world.lookup_mut::<Health>();
    for entity in &entities {
        let mut health = lookup.get_mut(*entity).unwrap();
        health.0 *= 10;
    }

    for (i, entity) in entities.iter().enumerate() {
        assert_eq!(*world.get::<Health>(*entity).unwrap(), Health(i as u32 * 10));
    }
}

#[test]
fn mutable_lookups_toggle_enable_bits() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = World::default();
    world
        .registry_mut()
        .register_enableable::<Shielded>()
        .unwrap();
    let entity = world.spawn((Health(1), Shielded));

    let lookup = world.lookup_mut::<Shielded>();
    assert_eq!(lookup.is_enabled(entity), Ok(true));
    assert_eq!(lookup.set_enabled(entity, false), Ok(true));
    assert_eq!(lookup.is_enabled(entity), Ok(false));
    assert_eq!(world.lookup::<Shielded>().is_enabled(entity), Ok(false));
}

#[test]
#[should_panic(expected = "already borrowed")]
fn reads_conflict_with_open_writes() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut world = World::default();
    let a = world.spawn((Health(1),));
    let b = world.spawn((Health(2),));

    let writer = world.lookup_mut::<Health>();
    let _a = writer.get_mut(a).unwrap();
    let reader = world.lookup::<Health>();
    let _b = reader.get(b).unwrap();
}
