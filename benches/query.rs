use criterion::*;
use tessera::*;

#[derive(Copy, Clone, Debug, PartialEq)]
struct A(f32);

#[derive(Copy, Clone, Debug, PartialEq)]
struct B(f32);

#[derive(Copy, Clone, Debug, PartialEq)]
struct C(f32);

#[derive(Copy, Clone, Debug, PartialEq)]
struct Active;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct Team(u8);

fn setup(n: usize) -> World {
    let mut world = World::default();
    world
        .registry_mut()
        .register_enableable::<Active>()
        .unwrap();

    world.extend((0..n).map(|i| (A(i as f32), B(0.0))));
    world.extend((0..n).map(|i| (A(i as f32), C(0.0), Active)));
    world.extend_shared(Team(0), (0..n).map(|i| (A(i as f32), B(0.0))));
    world.extend_shared(Team(1), (0..n).map(|i| (A(i as f32), B(0.0))));

    // disable every third row of the enableable archetype
    let query = world
        .compile_query(&QueryDesc::new().read::<Active>())
        .unwrap();
    let entities = query.to_entities(&world);
    for entity in entities.iter().step_by(3) {
        let _ = world.set_enabled::<Active>(*entity, false);
    }

    world
}

fn sequential(world: &World, query: &Query) {
    for chunk in query.iter_chunks(world) {
        let a = chunk.column::<A>();
        let mut b = chunk.column_mut::<B>();
        for row in chunk.range() {
            b[row].0 = a[row].0;
        }
    }
}

#[cfg(feature = "parallel")]
fn parallel(world: &World, query: &Query) {
    query.par_for_each_chunk(world, |chunk| {
        let a = chunk.column::<A>();
        let mut b = chunk.column_mut::<B>();
        for row in chunk.range() {
            b[row].0 = a[row].0;
        }
    });
}

fn bench_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");
    for n in [1000usize, 10_000, 100_000].iter() {
        let mut world = setup(*n);
        let query = world
            .compile_query(&QueryDesc::new().read::<A>().write::<B>())
            .unwrap();

        group.bench_with_input(BenchmarkId::new("sequential", n), n, |b, _| {
            b.iter(|| sequential(&world, &query))
        });

        #[cfg(feature = "parallel")]
        group.bench_with_input(BenchmarkId::new("parallel", n), n, |b, _| {
            b.iter(|| parallel(&world, &query))
        });
    }
    group.finish();
}

fn bench_filters(c: &mut Criterion) {
    let mut world = setup(10_000);
    let mut shared = world
        .compile_query(&QueryDesc::new().read::<A>().read::<Team>())
        .unwrap();
    shared.set_shared_filter(&world, &Team(1)).unwrap();
    let enabled = world
        .compile_query(&QueryDesc::new().read::<A>().read::<Active>())
        .unwrap();

    c.bench_function("shared filter count", |b| {
        b.iter(|| black_box(shared.count(&world)))
    });
    c.bench_function("enable bits count", |b| {
        b.iter(|| black_box(enabled.count(&world)))
    });
    c.bench_function("chunk list", |b| {
        b.iter(|| black_box(enabled.chunk_list(&world).len()))
    });
}

fn bench_compile(c: &mut Criterion) {
    let mut world = setup(1000);
    c.bench_function("compile interned query", |b| {
        b.iter(|| {
            world
                .compile_query(&QueryDesc::new().write::<B>().read::<A>().none::<C>())
                .unwrap()
        })
    });
}

criterion_group!(basic, bench_iteration, bench_filters, bench_compile);
criterion_main!(basic);
