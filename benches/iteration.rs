use comb::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

const N: usize = 10_000;

fn build_world() -> World {
    let mut world = World::new();
    world.register::<Position>("Position");
    world.register::<Velocity>("Velocity");
    for i in 0..N {
        world.create_entity((
            Position { x: i as f32, y: 0.0 },
            Velocity { dx: 1.0, dy: 0.5 },
        ));
    }
    world
}

fn create_entities(c: &mut Criterion) {
    c.bench_function("create_10k", |b| {
        b.iter(|| black_box(build_world()));
    });
}

fn iterate_view(c: &mut Criterion) {
    let world = build_world();
    c.bench_function("iterate_10k", |b| {
        b.iter(|| {
            let view = world.view::<(Write<Position>, Read<Velocity>)>();
            for (_, position, velocity) in view.iter() {
                position.x += velocity.dx;
                position.y += velocity.dy;
            }
        });
    });
}

fn tick_scheduler(c: &mut Criterion) {
    let mut world = build_world();
    let mut scheduler = Scheduler::new();
    c.bench_function("tick_10k", |b| {
        b.iter(|| {
            scheduler.schedule(System::<(Write<Position>, Read<Velocity>), _>::new(
                "integrate",
                |_, chunk| {
                    for (_, position, velocity) in chunk {
                        position.x += velocity.dx;
                        position.y += velocity.dy;
                    }
                },
            ));
            scheduler.run_systems(&mut world);
        });
    });
}

criterion_group!(benches, create_entities, iterate_view, tick_scheduler);
criterion_main!(benches);
