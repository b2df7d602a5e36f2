//! Views: queries over chunks plus the iterators systems consume.
//!
//! A view is parameterized by an ordered tuple of [`Read`]/[`Write`]
//! elements. Construction only records the tuple; materialization against a
//! world enumerates the matching archetypes and captures, per non-empty
//! chunk, its length and the base pointer of each accessed column. After
//! that, iteration is one indexed tuple fetch per entity.
//!
//! Captured pointers are valid until the next structural mutation of the
//! matched archetypes. The scheduler guarantees that window by funnelling
//! all structural changes through the command buffer; hosts iterating
//! manually get the same contract from the borrow they hold on the world.

use crate::archetype::SharedValue;
use crate::chunk::Chunk;
use crate::entity::Entity;
use crate::registry::{Component, Registry, TypeIndex};
use crate::typeset::TypeQuery;
use crate::world::World;
use smallvec::SmallVec;
use std::any::TypeId;
use std::marker::PhantomData;

/// Shared (read-only) access to a component type within a view tuple.
pub struct Read<T>(PhantomData<T>);

/// Exclusive (read-write) access to a component type within a view tuple.
pub struct Write<T>(PhantomData<T>);

/// One element of a view tuple.
pub trait ViewPart: 'static {
    type Component: Component;
    type Ref<'a>;
    const WRITES: bool;

    /// Produces the element reference for one entity.
    ///
    /// # Safety
    /// `base` must be the column base captured for this part, `index` a live
    /// element, and the aliasing rules of the access mode must hold.
    unsafe fn deref<'a>(base: *mut u8, index: usize) -> Self::Ref<'a>;
}

impl<T: Component> ViewPart for Read<T> {
    type Component = T;
    type Ref<'a> = &'a T;
    const WRITES: bool = false;

    unsafe fn deref<'a>(base: *mut u8, index: usize) -> &'a T {
        &*(base as *const T).add(index)
    }
}

impl<T: Component> ViewPart for Write<T> {
    type Component = T;
    type Ref<'a> = &'a mut T;
    const WRITES: bool = true;

    unsafe fn deref<'a>(base: *mut u8, index: usize) -> &'a mut T {
        &mut *(base as *mut T).add(index)
    }
}

/// An ordered tuple of view parts.
pub trait ViewTuple: 'static {
    /// The item iterators yield: the entity id followed by one reference
    /// per part.
    type Item<'a>;

    /// Adds the tuple's types to a query: every part is required, and each
    /// lands in the read or write facet according to its access mode.
    fn fill_query(registry: &Registry, query: &mut TypeQuery);

    /// Captures the column base pointer of every part for one chunk.
    fn base_pointers(chunk: &Chunk, registry: &Registry, out: &mut SmallVec<[*mut u8; 4]>);

    /// Fetches the item at `index`.
    ///
    /// # Safety
    /// See [`ViewPart::deref`].
    unsafe fn fetch<'a>(entity: Entity, columns: &[*mut u8], index: usize) -> Self::Item<'a>;
}

fn part_query<P: ViewPart>(registry: &Registry, query: &mut TypeQuery) {
    let index = lookup::<P::Component>(registry);
    query.required.insert(index);
    if P::WRITES {
        if query.reads.contains(index) {
            panic!(
                "view reads and writes component {} at once",
                std::any::type_name::<P::Component>()
            );
        }
        query.writes.insert(index);
    } else {
        if query.writes.contains(index) {
            panic!(
                "view reads and writes component {} at once",
                std::any::type_name::<P::Component>()
            );
        }
        query.reads.insert(index);
    }
}

fn part_base<T: Component>(chunk: &Chunk, registry: &Registry) -> *mut u8 {
    let index = lookup::<T>(registry);
    match chunk.column_base(index) {
        Some((base, _)) => base,
        // zero-sized types have no column; any well-aligned pointer serves
        None if std::mem::size_of::<T>() == 0 => {
            std::ptr::NonNull::<T>::dangling().as_ptr() as *mut u8
        }
        None => panic!(
            "component {} has no per-entity column; shared values are read through \
             the world or pruned with filter_shared",
            std::any::type_name::<T>()
        ),
    }
}

fn lookup<T: Component>(registry: &Registry) -> TypeIndex {
    registry.lookup::<T>().unwrap_or_else(|| {
        panic!(
            "component type {} is not registered",
            std::any::type_name::<T>()
        )
    })
}

macro_rules! impl_view_tuple {
    ($(($part:ident, $idx:tt)),+) => {
        impl<$($part: ViewPart),+> ViewTuple for ($($part,)+) {
            type Item<'a> = (Entity, $($part::Ref<'a>,)+);

            fn fill_query(registry: &Registry, query: &mut TypeQuery) {
                $(part_query::<$part>(registry, query);)+
            }

            fn base_pointers(
                chunk: &Chunk,
                registry: &Registry,
                out: &mut SmallVec<[*mut u8; 4]>,
            ) {
                $(out.push(part_base::<$part::Component>(chunk, registry));)+
            }

            unsafe fn fetch<'a>(
                entity: Entity,
                columns: &[*mut u8],
                index: usize,
            ) -> Self::Item<'a> {
                (entity, $($part::deref(columns[$idx], index),)+)
            }
        }
    };
}

impl_view_tuple!((A, 0));
impl_view_tuple!((A, 0), (B, 1));
impl_view_tuple!((A, 0), (B, 1), (C, 2));
impl_view_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
impl_view_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));

/// One matched chunk: its live length and captured base pointers.
pub(crate) struct ChunkSlice {
    pub len: usize,
    entities: *const Entity,
    columns: SmallVec<[*mut u8; 4]>,
}

// Safety: the pointers target chunk storage whose aliasing is governed by
// the world's type-lock discipline; the slice itself is plain data.
unsafe impl Send for ChunkSlice {}
unsafe impl Sync for ChunkSlice {}

/// A query over a world, materialized into a list of matching chunks.
pub struct View<V: ViewTuple> {
    with: SmallVec<[TypeId; 2]>,
    exclude: SmallVec<[TypeId; 2]>,
    shared_filters: SmallVec<[(TypeId, Box<[u8]>); 1]>,
    query: TypeQuery,
    chunks: Vec<ChunkSlice>,
    ready: bool,
    _marker: PhantomData<fn() -> V>,
}

// Safety: see ChunkSlice; the view adds no interior mutability.
unsafe impl<V: ViewTuple> Send for View<V> {}
unsafe impl<V: ViewTuple> Sync for View<V> {}

impl<V: ViewTuple> View<V> {
    pub fn new() -> Self {
        Self {
            with: SmallVec::new(),
            exclude: SmallVec::new(),
            shared_filters: SmallVec::new(),
            query: TypeQuery::default(),
            chunks: Vec::new(),
            ready: false,
            _marker: PhantomData,
        }
    }

    /// Additionally requires `T` on matched archetypes without accessing it.
    pub fn with<T: Component>(mut self) -> Self {
        self.with.push(TypeId::of::<T>());
        self
    }

    /// Rejects archetypes containing `T`.
    pub fn exclude<T: Component>(mut self) -> Self {
        self.exclude.push(TypeId::of::<T>());
        self
    }

    /// Prunes matched chunks to those whose shared singleton of type `T`
    /// equals `value`.
    pub fn filter_shared<T: Component + Copy>(mut self, value: T) -> Self {
        let bytes = unsafe {
            std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>())
        };
        self.shared_filters.push((TypeId::of::<T>(), bytes.into()));
        self
    }

    /// The resolved query. Meaningful after materialization.
    pub(crate) fn query(&self) -> &TypeQuery {
        &self.query
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready
    }

    /// Resolves the query against the registry and captures all matching
    /// chunks with `len > 0`.
    pub fn materialize(&mut self, world: &World) {
        let registry = world.registry();

        let mut query = TypeQuery::default();
        V::fill_query(registry, &mut query);
        for id in &self.with {
            query.required.insert(lookup_type_id(registry, *id));
        }
        for id in &self.exclude {
            query.excluded.insert(lookup_type_id(registry, *id));
        }
        let shared_filters: SmallVec<[(TypeIndex, &[u8]); 1]> = self
            .shared_filters
            .iter()
            .map(|(id, bytes)| (lookup_type_id(registry, *id), bytes.as_ref()))
            .collect();

        self.chunks.clear();
        for archetype in world.archetypes() {
            if !archetype.matches(&query) {
                continue;
            }
            for (_, chunk) in archetype.chunks() {
                if chunk.is_empty() {
                    continue;
                }
                let matches_shared = shared_filters
                    .iter()
                    .all(|(index, bytes)| chunk.shared_eq(*index, bytes.as_ptr()));
                if !matches_shared {
                    continue;
                }

                let mut columns = SmallVec::new();
                V::base_pointers(chunk, registry, &mut columns);
                self.chunks.push(ChunkSlice {
                    len: chunk.len(),
                    entities: chunk.entities().as_ptr(),
                    columns,
                });
            }
        }

        self.query = query;
        self.ready = true;
    }

    /// Drops the captured chunk list, forcing re-materialization.
    pub fn invalidate(&mut self) {
        self.chunks.clear();
        self.ready = false;
    }

    /// The number of captured chunks.
    pub fn chunk_count(&self) -> usize {
        debug_assert!(self.ready);
        self.chunks.len()
    }

    /// The number of entities across all captured chunks.
    pub fn entity_count(&self) -> usize {
        debug_assert!(self.ready);
        self.chunks.iter().map(|slice| slice.len).sum()
    }

    /// Iterates one captured chunk. Chunk-local iterators of the same view
    /// may run concurrently; the scheduler's type locks rule out aliased
    /// writes between systems.
    pub fn chunk_iter(&self, index: usize) -> ChunkIter<'_, V> {
        debug_assert!(self.ready, "view not materialized");
        ChunkIter {
            slice: &self.chunks[index],
            index: 0,
            _marker: PhantomData,
        }
    }

    /// Iterates every entity across all captured chunks. Not thread-safe;
    /// the scheduler dispatches per-chunk iterators instead.
    pub fn iter(&self) -> ViewIter<'_, V> {
        debug_assert!(self.ready, "view not materialized");
        ViewIter {
            chunks: &self.chunks,
            chunk: 0,
            index: 0,
            _marker: PhantomData,
        }
    }
}

impl<V: ViewTuple> Default for View<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_type_id(registry: &Registry, id: TypeId) -> TypeIndex {
    registry
        .lookup_type_id(id)
        .expect("component type used in a view predicate is not registered")
}

/// Iterator over the entities of a single captured chunk.
pub struct ChunkIter<'a, V: ViewTuple> {
    slice: &'a ChunkSlice,
    index: usize,
    _marker: PhantomData<fn() -> V>,
}

impl<'a, V: ViewTuple> Iterator for ChunkIter<'a, V> {
    type Item = V::Item<'a>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.slice.len {
            return None;
        }
        // Safety: index is within the live range captured at materialization
        // and each element is yielded exactly once.
        let item = unsafe {
            let entity = *self.slice.entities.add(self.index);
            V::fetch(entity, &self.slice.columns, self.index)
        };
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.slice.len - self.index;
        (remaining, Some(remaining))
    }
}

impl<'a, V: ViewTuple> ExactSizeIterator for ChunkIter<'a, V> {}

/// Iterator over the entities of every captured chunk in sequence.
pub struct ViewIter<'a, V: ViewTuple> {
    chunks: &'a [ChunkSlice],
    chunk: usize,
    index: usize,
    _marker: PhantomData<fn() -> V>,
}

impl<'a, V: ViewTuple> Iterator for ViewIter<'a, V> {
    type Item = V::Item<'a>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let slice = self.chunks.get(self.chunk)?;
            if self.index < slice.len {
                // Safety: as in ChunkIter::next.
                let item = unsafe {
                    let entity = *slice.entities.add(self.index);
                    V::fetch(entity, &slice.columns, self.index)
                };
                self.index += 1;
                return Some(item);
            }
            self.chunk += 1;
            self.index = 0;
        }
    }
}

impl World {
    /// Builds and materializes a view over this world.
    pub fn view<V: ViewTuple>(&self) -> View<V> {
        let mut view = View::new();
        view.materialize(self);
        view
    }

    /// Materializes a configured view (one carrying `with`/`exclude`/
    /// `filter_shared` predicates) against this world.
    pub fn materialize<V: ViewTuple>(&self, mut view: View<V>) -> View<V> {
        view.materialize(self);
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, Copy, Debug, PartialEq)]
    struct Pos(f32);
    #[derive(Default, Clone, Copy, Debug, PartialEq)]
    struct Vel(f32);
    #[derive(Default, Clone, Copy, Debug, PartialEq)]
    struct Frozen;
    #[derive(Default, Clone, Copy, PartialEq)]
    struct Team(u32);

    fn world() -> World {
        let mut world = World::new();
        world.register::<Pos>("Pos");
        world.register::<Vel>("Vel");
        world.register::<Frozen>("Frozen");
        world.register_shared::<Team>("Team");
        world
    }

    #[test]
    fn iterates_matching_entities_with_ids() {
        let mut world = world();
        let a = world.create_entity((Pos(1.0), Vel(10.0)));
        world.create_entity((Pos(2.0),));
        let b = world.create_entity((Pos(3.0), Vel(30.0)));

        let view = world.view::<(Read<Pos>, Read<Vel>)>();
        let seen: Vec<(Entity, f32, f32)> =
            view.iter().map(|(id, pos, vel)| (id, pos.0, vel.0)).collect();
        assert_eq!(seen, vec![(a, 1.0, 10.0), (b, 3.0, 30.0)]);
    }

    #[test]
    fn writes_mutate_in_place() {
        let mut world = world();
        let id = world.create_entity((Pos(1.0), Vel(2.0)));

        let view = world.view::<(Write<Pos>, Read<Vel>)>();
        for (_, pos, vel) in view.iter() {
            pos.0 += vel.0;
        }
        drop(view);

        assert_eq!(world.get_component::<Pos>(id), Some(&Pos(3.0)));
    }

    #[test]
    fn exclude_prunes_archetypes() {
        let mut world = world();
        world.create_entity((Pos(1.0), Frozen));
        let live = world.create_entity((Pos(2.0),));

        let view = world.materialize(View::<(Read<Pos>,)>::new().exclude::<Frozen>());
        let seen: Vec<Entity> = view.iter().map(|(id, _)| id).collect();
        assert_eq!(seen, vec![live]);
    }

    #[test]
    fn filter_shared_prunes_chunks() {
        let mut world = world();
        let red = world.create_entity((Pos(1.0), Team(1)));
        world.create_entity((Pos(2.0), Team(2)));

        let view = world.materialize(View::<(Read<Pos>,)>::new().filter_shared(Team(1)));
        let seen: Vec<Entity> = view.iter().map(|(id, _)| id).collect();
        assert_eq!(seen, vec![red]);
    }

    #[test]
    #[should_panic(expected = "reads and writes")]
    fn aliased_access_in_one_view_is_rejected() {
        let world = world();
        let _ = world.view::<(Read<Pos>, Write<Pos>)>();
    }

    #[test]
    fn chunk_iterators_cover_the_view() {
        let mut world = world();
        for i in 0..10 {
            world.create_entity((Pos(i as f32),));
        }

        let view = world.view::<(Read<Pos>,)>();
        let mut total = 0;
        for chunk in 0..view.chunk_count() {
            total += view.chunk_iter(chunk).count();
        }
        assert_eq!(total, 10);
        assert_eq!(view.entity_count(), 10);
    }
}
