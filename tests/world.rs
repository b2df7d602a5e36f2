//! Storage-engine behavior: creation, chunk partitioning, shared-component
//! migration, state-preserving destruction, and the structural invariants
//! the world maintains through all of it.

use comb::prelude::*;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct A {
    a: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct B {
    b: i32,
    f: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct S {
    group: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct St {
    saved: i32,
}

fn ab_world() -> World {
    let mut world = World::new();
    world.register::<A>("AComp");
    world.register::<B>("BComp");
    world
}

/// Checks that every live chunk slot and the location map agree, both ways.
fn check_locations(world: &World) {
    let mut live = 0;
    for archetype in world.archetypes() {
        for (chunk_index, chunk) in archetype.chunks() {
            for (element, id) in chunk.entities().iter().enumerate() {
                let loc = world
                    .location(*id)
                    .unwrap_or_else(|| panic!("{id} stored but not in the location map"));
                assert_eq!(loc.archetype as usize, archetype.index());
                assert_eq!(loc.chunk as usize, chunk_index);
                assert_eq!(loc.element as usize, element);
                live += 1;
            }
        }
    }
    assert_eq!(live, world.len());
}

#[test]
fn create_lands_in_first_slot() {
    let mut world = ab_world();
    let id = world.create_entity((A { a: 2 }, B { b: 2, f: 2.0 }));

    assert_eq!(id, Entity(1));
    let loc = world.location(id).unwrap();
    assert_eq!((loc.chunk, loc.element), (0, 0));

    let a_index = world.type_index::<A>().unwrap();
    let b_index = world.type_index::<B>().unwrap();
    let types: TypeSet = [a_index, b_index].into_iter().collect();
    assert!(world.has_all(id, &types));
    assert_eq!(world.get_component::<A>(id).unwrap().a, 2);
    check_locations(&world);
}

#[test]
fn ten_thousand_entities_fill_chunks_deterministically() {
    let mut world = ab_world();
    for i in 0..10_000 {
        world.create_entity((A { a: i }, B { b: 1, f: 0.0 }));
    }

    let archetype = world.archetypes().next().unwrap();
    let capacity = archetype.chunks().next().unwrap().1.capacity();
    let expected_chunks = (10_000 + capacity - 1) / capacity;

    assert_eq!(archetype.chunks().count(), expected_chunks);
    let mut sizes: Vec<usize> = archetype.chunks().map(|(_, c)| c.len()).collect();
    let last = sizes.pop().unwrap();
    assert!(sizes.iter().all(|&len| len == capacity));
    assert_eq!(last, 10_000 - (expected_chunks - 1) * capacity);
    check_locations(&world);
}

#[test]
fn chunk_capacity_is_reproducible() {
    let world_a = {
        let mut world = ab_world();
        world.create_entity((A::default(), B::default()));
        world
    };
    let world_b = {
        let mut world = ab_world();
        world.create_entity((A::default(), B::default()));
        world
    };
    let cap = |world: &World| {
        world
            .archetypes()
            .next()
            .unwrap()
            .chunks()
            .next()
            .unwrap()
            .1
            .capacity()
    };
    assert_eq!(cap(&world_a), cap(&world_b));
}

#[test]
fn set_shared_adds_and_partitions() {
    let mut world = ab_world();
    world.register_shared::<S>("SShared");

    let id = world.create_entity((A { a: 7 }, B { b: 3, f: 1.5 }));
    let plain_archetype = world.location(id).unwrap().archetype;

    assert!(world.set_shared(id, S { group: 42 }));

    // migrated to the widened archetype, values preserved exactly
    let loc = world.location(id).unwrap();
    assert_ne!(loc.archetype, plain_archetype);
    assert_eq!(world.get_component::<A>(id), Some(&A { a: 7 }));
    assert_eq!(world.get_component::<B>(id), Some(&B { b: 3, f: 1.5 }));
    assert_eq!(world.get_component::<S>(id), Some(&S { group: 42 }));

    // setting the same value again changes nothing
    let chunks_before = world.archetype(loc.archetype as usize).unwrap().chunks().count();
    assert!(world.set_shared(id, S { group: 42 }));
    assert_eq!(world.location(id).unwrap(), loc);
    let chunks_after = world.archetype(loc.archetype as usize).unwrap().chunks().count();
    assert_eq!(chunks_before, chunks_after);

    // a genuinely new value allocates exactly one more chunk
    assert!(world.set_shared(id, S { group: 43 }));
    check_locations(&world);
}

#[test]
fn shared_values_split_chunks_within_one_archetype() {
    let mut world = ab_world();
    world.register_shared::<S>("SShared");

    let red: Vec<Entity> = (0..3)
        .map(|i| world.create_entity((A { a: i }, S { group: 1 })))
        .collect();
    let blue = world.create_entity((A { a: 9 }, S { group: 2 }));

    let archetype = world.archetypes().next().unwrap();
    assert_eq!(archetype.chunks().count(), 2);

    let red_chunk = world.location(red[0]).unwrap().chunk;
    assert!(red.iter().all(|&id| world.location(id).unwrap().chunk == red_chunk));
    assert_ne!(world.location(blue).unwrap().chunk, red_chunk);

    // at most one partially-filled chunk per shared tuple
    check_locations(&world);
}

#[test]
fn destroy_preserves_state_components() {
    let mut world = ab_world();
    world.register_with_kind::<St>("StState", ComponentKind::State);

    let id = world.create_entity((A { a: 1 }, St { saved: 77 }));
    assert!(world.destroy_entity(id, true));

    // the entity lives on, reduced to state plus the deletion marker
    assert!(world.contains(id));
    assert!(world.get_component::<A>(id).is_none());
    assert_eq!(world.get_component::<St>(id), Some(&St { saved: 77 }));

    let deleted = world.registry().lookup_by_name("DeletedEntity").unwrap();
    let marker: TypeSet = [deleted].into_iter().collect();
    assert!(world.has_all(id, &marker));

    // reaping it for real frees the slot
    assert!(world.destroy_entity(id, false));
    assert!(!world.contains(id));
    check_locations(&world);
}

#[test]
fn create_destroy_leaves_no_residue() {
    let mut world = ab_world();
    let baseline_archetypes = world.archetypes().count();
    let baseline_len = world.len();

    let id = world.create_entity((A { a: 1 }, B::default()));
    assert!(world.destroy_entity(id, true));

    assert_eq!(world.len(), baseline_len);
    assert_eq!(world.archetypes().count(), baseline_archetypes);
}

#[test]
fn add_and_remove_components_migrate_values() {
    let mut world = ab_world();
    let id = world.create_entity((A { a: 5 },));

    assert!(world.add_component(id, B { b: 2, f: 0.5 }));
    assert_eq!(world.get_component::<A>(id), Some(&A { a: 5 }));
    assert_eq!(world.get_component::<B>(id), Some(&B { b: 2, f: 0.5 }));

    let a_index = world.type_index::<A>().unwrap();
    let remove: TypeSet = [a_index].into_iter().collect();
    assert!(world.remove_components(id, &remove));
    assert!(world.get_component::<A>(id).is_none());
    assert_eq!(world.get_component::<B>(id), Some(&B { b: 2, f: 0.5 }));
    check_locations(&world);
}

#[test]
fn removing_every_component_destroys() {
    let mut world = ab_world();
    let id = world.create_entity((A { a: 5 }, B::default()));

    let a = world.type_index::<A>().unwrap();
    let b = world.type_index::<B>().unwrap();
    let all: TypeSet = [a, b].into_iter().collect();
    assert!(world.remove_components(id, &all));

    assert!(!world.contains(id));
    assert_eq!(world.archetypes().count(), 0);
}

#[test]
fn insertion_never_duplicates_partial_chunks() {
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    struct Bulk {
        data: [u64; 16],
    }

    let mut world = World::new();
    world.register::<Bulk>("Bulk");
    world.register_shared::<S>("SShared");

    // alternate between two shared groups so insertions keep switching
    // chunks; several chunks per group fill up along the way
    for i in 0..1000u32 {
        world.create_entity((Bulk::default(), S { group: i % 2 }));
    }

    let archetype = world.archetypes().next().unwrap();
    for group in [0u32, 1u32] {
        let partial = archetype
            .chunks()
            .filter(|(_, chunk)| !chunk.is_full())
            .filter(|(_, chunk)| {
                let resident = chunk.entities()[0];
                world.get_component::<S>(resident) == Some(&S { group })
            })
            .count();
        assert!(partial <= 1, "group {group} has {partial} partially-filled chunks");
    }
}

#[test]
fn setting_a_missing_component_is_a_sentinel() {
    let mut world = ab_world();
    let id = world.create_entity((A { a: 1 },));

    // the entity has no B; nothing is mutated
    assert!(!world.set_component(id, B { b: 9, f: 9.0 }));
    assert!(world.get_component::<B>(id).is_none());
    assert_eq!(world.get_component::<A>(id), Some(&A { a: 1 }));
}

#[test]
fn swap_removal_keeps_survivors_consistent() {
    let mut world = ab_world();
    let ids: Vec<Entity> = (0..64)
        .map(|i| world.create_entity((A { a: i }, B { b: i, f: i as f32 })))
        .collect();

    // delete every third entity, then verify the survivors
    for id in ids.iter().step_by(3) {
        assert!(world.destroy_entity(*id, true));
    }
    check_locations(&world);
    for (i, id) in ids.iter().enumerate() {
        if i % 3 == 0 {
            assert!(!world.contains(*id));
        } else {
            assert_eq!(world.get_component::<A>(*id), Some(&A { a: i as i32 }));
        }
    }
}
