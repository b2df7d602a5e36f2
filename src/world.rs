//! The world: registry, archetypes, the entity location map, type locks,
//! and the command buffer.
//!
//! Structural mutation (creating, destroying, or migrating entities) always
//! goes through `&mut World`. During a tick, systems only hold `&World`;
//! the structural changes they request are queued on the command buffer and
//! applied when the scheduler drains it between system groups.

use crate::archetype::{Archetype, SharedValue};
use crate::command::CommandBuffer;
use crate::entity::{Entity, EntityLoc};
use crate::insert::EntityBundle;
use crate::registry::{Component, ComponentKind, Registry, RegistryError, TypeIndex};
use crate::typeset::TypeSet;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

/// Linear-scan lock tables over component types. The registry is small, so
/// scanning beats anything cleverer; multiple readers of one type each push
/// their own entry.
#[derive(Default)]
struct TypeLocks {
    read: Vec<TypeIndex>,
    write: Vec<TypeIndex>,
}

/// A dynamic collection of entities grouped into archetypes by their exact
/// component type-set.
pub struct World {
    registry: Registry,
    archetypes: Vec<Option<Archetype>>,
    locations: FnvHashMap<Entity, EntityLoc>,
    commands: CommandBuffer,
    locks: Mutex<TypeLocks>,
    next_entity_id: i64,
    dont_save_type: TypeIndex,
    deleted_type: TypeIndex,
    temp_remap: FnvHashMap<Entity, Entity>,
}

impl World {
    pub fn new() -> Self {
        let registry = Registry::new();
        let dont_save_type = registry.lookup_by_name("DontSaveEntity").unwrap();
        let deleted_type = registry.lookup_by_name("DeletedEntity").unwrap();
        Self {
            registry,
            archetypes: Vec::new(),
            locations: FnvHashMap::default(),
            commands: CommandBuffer::new(),
            locks: Mutex::new(TypeLocks::default()),
            next_entity_id: 1,
            dont_save_type,
            deleted_type,
            temp_remap: FnvHashMap::default(),
        }
    }

    // ---- registration ------------------------------------------------

    /// Registers `T` as a regular component. Registering a name twice
    /// returns the existing index with a diagnostic.
    pub fn register<T: Component + Default>(&mut self, name: &str) -> TypeIndex {
        self.register_with_kind::<T>(name, ComponentKind::Regular)
    }

    /// Registers `T` with an explicit kind.
    pub fn register_with_kind<T: Component + Default>(
        &mut self,
        name: &str,
        kind: ComponentKind,
    ) -> TypeIndex {
        match self.registry.register::<T>(name, kind) {
            Ok(index) => index,
            Err(error) => self.recover_registration::<T>(name, error),
        }
    }

    /// Registers `T` as a shared (once-per-chunk) component.
    pub fn register_shared<T: Component + Default + Copy + PartialEq>(
        &mut self,
        name: &str,
    ) -> TypeIndex {
        match self.registry.register_shared::<T>(name) {
            Ok(index) => index,
            Err(error) => self.recover_registration::<T>(name, error),
        }
    }

    fn recover_registration<T: Component>(&self, name: &str, error: RegistryError) -> TypeIndex {
        match error {
            RegistryError::AlreadyRegistered(_) => {
                warn!(name, "component type already registered, reusing its index");
                self.registry.lookup_by_name(name).unwrap()
            }
            RegistryError::TypeAliased(..) => {
                warn!(name, "rust type already registered, reusing its index");
                self.registry.lookup::<T>().unwrap()
            }
            RegistryError::SharedNotTrivial(name) => {
                panic!("shared component {name:?} must be trivially copyable")
            }
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn type_index<T: Component>(&self) -> Option<TypeIndex> {
        self.registry.lookup::<T>()
    }

    pub(crate) fn dont_save_type(&self) -> TypeIndex {
        self.dont_save_type
    }

    // ---- archetype management ----------------------------------------

    /// Finds the archetype whose type-set equals `types`, reusing a freed
    /// slot or appending when none exists.
    pub(crate) fn get_or_create_archetype(&mut self, types: &TypeSet) -> usize {
        let mut first_hole = None;
        for (index, slot) in self.archetypes.iter().enumerate() {
            match slot {
                Some(archetype) if archetype.types() == types => return index,
                None if first_hole.is_none() => first_hole = Some(index),
                _ => {}
            }
        }

        let index = first_hole.unwrap_or(self.archetypes.len());
        let archetype = Archetype::new(index, types.clone(), &self.registry);
        if index == self.archetypes.len() {
            self.archetypes.push(Some(archetype));
        } else {
            self.archetypes[index] = Some(archetype);
        }
        index
    }

    fn release_archetype(&mut self, index: usize) {
        self.archetypes[index] = None;
        while matches!(self.archetypes.last(), Some(None)) {
            self.archetypes.pop();
        }
        debug!(archetype = index, "released archetype");
    }

    pub fn archetype(&self, index: usize) -> Option<&Archetype> {
        self.archetypes.get(index).and_then(|slot| slot.as_ref())
    }

    /// Iterates live archetypes.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter().filter_map(|slot| slot.as_ref())
    }

    /// Raw archetype slots, holes included (save-time index bookkeeping).
    pub(crate) fn archetype_slots(&self) -> &[Option<Archetype>] {
        &self.archetypes
    }

    pub(crate) fn archetype_mut(&mut self, index: usize) -> &mut Archetype {
        self.archetypes[index].as_mut().expect("archetype slot is a hole")
    }

    pub(crate) fn chunk_mut_at(&mut self, loc: EntityLoc) -> &mut crate::chunk::Chunk {
        self.archetype_mut(loc.archetype as usize).chunk_mut(loc.chunk as usize)
    }

    fn archetype_pair_mut(&mut self, a: usize, b: usize) -> (&mut Archetype, &mut Archetype) {
        debug_assert_ne!(a, b);
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (
                left[a].as_mut().expect("archetype slot is a hole"),
                right[0].as_mut().expect("archetype slot is a hole"),
            )
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            let src = right[0].as_mut().expect("archetype slot is a hole");
            let dst = left[b].as_mut().expect("archetype slot is a hole");
            (src, dst)
        }
    }

    // ---- entity lifecycle --------------------------------------------

    pub(crate) fn next_id(&mut self) -> Entity {
        let id = Entity(self.next_entity_id);
        self.next_entity_id += 1;
        id
    }

    /// Creates an entity from a tuple of component values. Shared-kind
    /// values select the chunk; the rest initialize its columns.
    pub fn create_entity<B: EntityBundle>(&mut self, bundle: B) -> Entity {
        let types = bundle.type_set(&self.registry);
        let shared = bundle.shared_values(&self.registry);
        let id = self.next_id();
        let loc = self.place(id, &types, &shared);

        let registry = &self.registry;
        let archetype = self.archetypes[loc.archetype as usize]
            .as_mut()
            .expect("archetype slot is a hole");
        let chunk = archetype.chunk_mut(loc.chunk as usize);
        bundle.write_components(registry, chunk, loc.element as usize);
        id
    }

    /// Creates an entity with default-valued components for an explicit
    /// type-set, constrained by the given shared values.
    pub fn create_entity_raw(&mut self, types: &TypeSet, shared: &[SharedValue]) -> Entity {
        let id = self.next_id();
        self.place(id, types, shared);
        id
    }

    fn place(&mut self, id: Entity, types: &TypeSet, shared: &[SharedValue]) -> EntityLoc {
        let archetype_index = self.get_or_create_archetype(types);
        let (chunk, element) = self.archetype_mut(archetype_index).allocate(id, shared);
        let loc = EntityLoc::new(archetype_index, chunk, element);
        self.locations.insert(id, loc);
        loc
    }

    /// Destroys an entity. With `preserve_state` set (the normal path), an
    /// entity whose archetype contains `State` components is instead
    /// migrated to an archetype of only its state components plus
    /// `DeletedEntity`, so the host can reap the state later.
    pub fn destroy_entity(&mut self, id: Entity, preserve_state: bool) -> bool {
        let Some(loc) = self.locations.get(&id).copied() else {
            return false;
        };
        let archetype = self.archetype(loc.archetype as usize).expect("dangling location");

        if preserve_state {
            let state_types = archetype.types().filter_state(&self.registry);
            if !state_types.is_empty() {
                let mut keep = state_types;
                keep.insert(self.deleted_type);
                return self.change_components(id, &keep);
            }
        }

        let archetype = self.archetype_mut(loc.archetype as usize);
        let displaced = archetype.delete_entity(loc.chunk as usize, loc.element as usize);
        let emptied = archetype.is_empty();
        self.locations.remove(&id);
        if let Some(moved) = displaced {
            self.locations.insert(moved, loc);
        }
        if emptied {
            self.release_archetype(loc.archetype as usize);
        }
        true
    }

    /// Replaces the entity's component type-set. Values of types present in
    /// both sets move; new types are default-initialized. An empty new set
    /// (or one containing only `DeletedEntity`) destroys the entity.
    pub fn change_components(&mut self, id: Entity, new_types: &TypeSet) -> bool {
        let Some(loc) = self.locations.get(&id).copied() else {
            return false;
        };

        let count = new_types.len();
        if count == 0 || (count == 1 && new_types.contains(self.deleted_type)) {
            return self.destroy_entity(id, false);
        }

        let destination = self.get_or_create_archetype(new_types);
        if destination == loc.archetype as usize {
            return true;
        }
        self.move_entity(id, loc, destination, &[]);
        true
    }

    /// Adds a component to an entity, migrating it to the widened
    /// archetype. Adding a type the entity already has assigns the value.
    pub fn add_component<T: Component>(&mut self, id: Entity, value: T) -> bool {
        let Some(loc) = self.locations.get(&id).copied() else {
            return false;
        };
        let Some(type_index) = self.registry.lookup::<T>() else {
            warn!(component = std::any::type_name::<T>(), "add_component on unregistered type");
            return false;
        };

        let archetype = self.archetype(loc.archetype as usize).expect("dangling location");
        if archetype.types().contains(type_index) {
            return self.set_component(id, value);
        }

        let mut new_types = archetype.types().clone();
        new_types.insert(type_index);
        let destination = self.get_or_create_archetype(&new_types);

        if self.registry.descriptor(type_index).kind() == ComponentKind::Shared {
            let shared = unsafe {
                SharedValue::from_raw(
                    type_index,
                    &value as *const T as *const u8,
                    std::mem::size_of::<T>(),
                )
            };
            std::mem::forget(value);
            self.move_entity(id, loc, destination, &[shared]);
        } else {
            self.move_entity(id, loc, destination, &[]);
            let new_loc = self.locations[&id];
            let chunk = self
                .archetype_mut(new_loc.archetype as usize)
                .chunk_mut(new_loc.chunk as usize);
            unsafe {
                chunk.write_component(
                    type_index,
                    new_loc.element as usize,
                    &value as *const T as *const u8,
                )
            };
            std::mem::forget(value);
        }
        true
    }

    /// Removes the given component types from an entity. Removing the last
    /// component destroys it.
    pub fn remove_components(&mut self, id: Entity, remove: &TypeSet) -> bool {
        let Some(loc) = self.locations.get(&id).copied() else {
            return false;
        };
        let mut remaining = self
            .archetype(loc.archetype as usize)
            .expect("dangling location")
            .types()
            .clone();
        remaining.subtract(remove);
        self.change_components(id, &remaining)
    }

    /// Assigns a component value in place. Shared kinds route to
    /// [`set_shared`](Self::set_shared).
    pub fn set_component<T: Component>(&mut self, id: Entity, value: T) -> bool {
        let Some(loc) = self.locations.get(&id).copied() else {
            return false;
        };
        let Some(type_index) = self.registry.lookup::<T>() else {
            warn!(component = std::any::type_name::<T>(), "set_component on unregistered type");
            return false;
        };
        if self.registry.descriptor(type_index).kind() == ComponentKind::Shared {
            return self.set_shared(id, value);
        }

        let chunk = self
            .archetype_mut(loc.archetype as usize)
            .chunk_mut(loc.chunk as usize);
        if chunk.component_slot(type_index, loc.element as usize).is_none() {
            warn!(entity = %id, component = std::any::type_name::<T>(), "set_component on missing component");
            return false;
        }
        unsafe {
            chunk.write_component(type_index, loc.element as usize, &value as *const T as *const u8)
        };
        std::mem::forget(value);
        true
    }

    /// Changes one shared value for an entity, migrating it between chunks
    /// (and if the entity did not carry the type yet, between archetypes).
    /// Setting the value a chunk already holds is a no-op.
    pub fn set_shared<T: Component>(&mut self, id: Entity, value: T) -> bool {
        let Some(type_index) = self.registry.lookup::<T>() else {
            warn!(component = std::any::type_name::<T>(), "set_shared on unregistered type");
            return false;
        };
        if self.registry.descriptor(type_index).kind() != ComponentKind::Shared {
            warn!(component = std::any::type_name::<T>(), "set_shared on non-shared type");
            return false;
        }
        let shared = unsafe {
            SharedValue::from_raw(type_index, &value as *const T as *const u8, std::mem::size_of::<T>())
        };
        std::mem::forget(value);
        self.set_shared_values(id, &[shared])
    }

    /// List form of [`set_shared`](Self::set_shared): applies several shared
    /// values at once, performing at most one migration.
    pub fn set_shared_values(&mut self, id: Entity, values: &[SharedValue]) -> bool {
        let Some(loc) = self.locations.get(&id).copied() else {
            return false;
        };

        let archetype = self.archetype(loc.archetype as usize).expect("dangling location");
        let mut missing: SmallVec<[SharedValue; 2]> = SmallVec::new();
        for value in values {
            if !archetype.types().contains(value.type_index()) {
                missing.push(value.clone());
            }
        }

        if missing.is_empty() {
            let archetype = self.archetype_mut(loc.archetype as usize);
            let ((chunk, element), displaced) =
                archetype.set_shared(loc.chunk as usize, loc.element as usize, values);
            let new_loc = EntityLoc::new(loc.archetype as usize, chunk, element);
            if new_loc != loc {
                self.locations.insert(id, new_loc);
                if let Some(moved) = displaced {
                    self.locations.insert(moved, loc);
                }
            }
        } else {
            let mut new_types = archetype.types().clone();
            for value in &missing {
                new_types.insert(value.type_index());
            }
            let destination = self.get_or_create_archetype(&new_types);
            self.move_entity(id, loc, destination, values);
        }
        true
    }

    /// Moves an entity to another archetype, carrying the component values
    /// both archetypes store and constraining chunk selection with the
    /// source chunk's shared values overridden by `shared_overrides`.
    fn move_entity(
        &mut self,
        id: Entity,
        src: EntityLoc,
        destination: usize,
        shared_overrides: &[SharedValue],
    ) {
        let (src_arch, dst_arch) = self.archetype_pair_mut(src.archetype as usize, destination);

        let src_chunk_ref = src_arch.chunk(src.chunk as usize).expect("dangling location");
        let constraint: SmallVec<[SharedValue; 2]> = dst_arch
            .layout()
            .shared_slots()
            .iter()
            .filter_map(|slot| {
                shared_overrides
                    .iter()
                    .find(|value| value.type_index() == slot.type_index)
                    .cloned()
                    .or_else(|| {
                        src_chunk_ref.shared_ptr(slot.type_index).map(|ptr| unsafe {
                            SharedValue::from_raw(slot.type_index, ptr, slot.size)
                        })
                    })
            })
            .collect();

        let dst_chunk_index = dst_arch.select_chunk_for(&constraint);
        let dst_chunk = dst_arch.chunk_mut(dst_chunk_index);
        let src_chunk = src_arch.chunk_mut(src.chunk as usize);

        let dst_element = dst_chunk.move_in(src_chunk, src.element as usize);

        // columns the destination lacks were not moved; drop them in place
        let dropped: SmallVec<[TypeIndex; 4]> = src_chunk
            .layout()
            .columns()
            .iter()
            .map(|column| column.type_index)
            .filter(|&t| dst_chunk.column_base(t).is_none())
            .collect();
        for type_index in dropped {
            src_chunk.drop_component(type_index, src.element as usize);
        }

        let displaced = src_chunk.pop_swap(src.element as usize, false);
        src_arch.release_chunk_if_empty(src.chunk as usize);
        let emptied = src_arch.is_empty();

        self.locations
            .insert(id, EntityLoc::new(destination, dst_chunk_index, dst_element));
        if let Some(moved) = displaced {
            self.locations.insert(moved, src);
        }
        if emptied {
            self.release_archetype(src.archetype as usize);
        }
    }

    // ---- access ------------------------------------------------------

    /// Borrows a component of an entity. Returns `None` for unknown ids and
    /// for types the entity does not carry. Shared kinds resolve to the
    /// chunk singleton.
    pub fn get_component<T: Component>(&self, id: Entity) -> Option<&T> {
        self.component_ptr::<T>(id).map(|ptr| unsafe { &*(ptr as *const T) })
    }

    /// Mutably borrows a component of an entity.
    ///
    /// The reference points into the chunk column and is invalidated by any
    /// structural mutation of the entity's archetype, which the `&mut self`
    /// receiver enforces.
    pub fn get_component_mut<T: Component>(&mut self, id: Entity) -> Option<&mut T> {
        self.component_ptr::<T>(id).map(|ptr| unsafe { &mut *(ptr as *mut T) })
    }

    fn component_ptr<T: Component>(&self, id: Entity) -> Option<*mut u8> {
        let loc = self.locations.get(&id)?;
        let type_index = self.registry.lookup::<T>()?;
        debug_assert_eq!(self.registry.descriptor(type_index).size(), std::mem::size_of::<T>());
        let chunk = self.archetype(loc.archetype as usize)?.chunk(loc.chunk as usize)?;
        if self.registry.descriptor(type_index).kind() == ComponentKind::Shared {
            chunk.shared_ptr(type_index)
        } else {
            chunk.component_slot(type_index, loc.element as usize)
        }
    }

    /// Whether the entity carries every type in `types`.
    pub fn has_all(&self, id: Entity, types: &TypeSet) -> bool {
        let Some(loc) = self.locations.get(&id) else {
            return false;
        };
        let archetype = self.archetype(loc.archetype as usize).expect("dangling location");
        types.is_subset(archetype.types())
    }

    pub fn contains(&self, id: Entity) -> bool {
        self.locations.contains_key(&id)
    }

    /// The number of live entities.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// The entity's current storage location.
    pub fn location(&self, id: Entity) -> Option<EntityLoc> {
        self.locations.get(&id).copied()
    }

    // ---- command buffer ----------------------------------------------

    /// The world's command buffer, for enqueueing structural changes from
    /// within systems.
    pub fn commands(&self) -> &CommandBuffer {
        &self.commands
    }

    /// Applies all queued commands in FIFO order, then clears the temp-id
    /// remapping table. The scheduler calls this once per tick, after all
    /// system groups have finished.
    pub fn flush_command_buffer(&mut self) {
        let queued = self.commands.take_queued();
        for command in queued {
            command.run(self);
        }
        self.temp_remap.clear();
    }

    /// Resolves a command-buffer placeholder id to the real id it was
    /// remapped to at drain time. Real ids pass through unchanged.
    pub fn resolve_temp(&self, id: Entity) -> Entity {
        if id.is_temporary() {
            self.temp_remap.get(&id).copied().unwrap_or(id)
        } else {
            id
        }
    }

    pub(crate) fn remember_temp(&mut self, temp: Entity, real: Entity) {
        self.temp_remap.insert(temp, real);
    }

    // ---- type locks ---------------------------------------------------

    /// Takes a read lock on a component type. Fails when the type is
    /// currently locked for writing.
    pub fn lock_read(&self, type_index: TypeIndex) -> bool {
        let mut locks = self.locks.lock();
        if locks.write.contains(&type_index) {
            return false;
        }
        locks.read.push(type_index);
        true
    }

    /// Takes a write lock on a component type. Fails when the type is
    /// locked in any way.
    pub fn lock_write(&self, type_index: TypeIndex) -> bool {
        let mut locks = self.locks.lock();
        if locks.write.contains(&type_index) || locks.read.contains(&type_index) {
            return false;
        }
        locks.write.push(type_index);
        true
    }

    pub fn release_read(&self, type_index: TypeIndex) {
        let mut locks = self.locks.lock();
        if let Some(position) = locks.read.iter().position(|&t| t == type_index) {
            locks.read.swap_remove(position);
        }
    }

    pub fn release_write(&self, type_index: TypeIndex) {
        let mut locks = self.locks.lock();
        if let Some(position) = locks.write.iter().position(|&t| t == type_index) {
            locks.write.swap_remove(position);
        }
    }

    /// Atomically acquires a system's whole lock set, or nothing.
    pub(crate) fn try_lock_types(&self, reads: &TypeSet, writes: &TypeSet) -> bool {
        let mut locks = self.locks.lock();
        for t in reads.iter() {
            if locks.write.contains(&t) {
                return false;
            }
        }
        for t in writes.iter() {
            if locks.write.contains(&t) || locks.read.contains(&t) {
                return false;
            }
        }
        for t in reads.iter() {
            locks.read.push(t);
        }
        for t in writes.iter() {
            locks.write.push(t);
        }
        true
    }

    pub(crate) fn release_types(&self, reads: &TypeSet, writes: &TypeSet) {
        let mut locks = self.locks.lock();
        for t in reads.iter() {
            if let Some(position) = locks.read.iter().position(|&x| x == t) {
                locks.read.swap_remove(position);
            }
        }
        for t in writes.iter() {
            if let Some(position) = locks.write.iter().position(|&x| x == t) {
                locks.write.swap_remove(position);
            }
        }
    }

    // ---- stream support -----------------------------------------------

    pub(crate) fn next_entity_id(&self) -> i64 {
        self.next_entity_id
    }

    pub(crate) fn set_next_entity_id(&mut self, next: i64) {
        self.next_entity_id = next;
    }

    pub(crate) fn insert_location(&mut self, id: Entity, loc: EntityLoc) {
        self.locations.insert(id, loc);
    }

    /// Drops all entities, archetypes, and queued commands. Loading a world
    /// stream starts from this state.
    pub(crate) fn reset_storage(&mut self) {
        self.archetypes.clear();
        self.locations.clear();
        self.commands.take_queued();
        self.temp_remap.clear();
        self.next_entity_id = 1;
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, Copy, Debug, PartialEq)]
    struct Pos(f32);
    #[derive(Default, Clone, Copy, Debug, PartialEq)]
    struct Vel(f32);

    #[test]
    fn archetype_set_equality_is_unique() {
        let mut world = World::new();
        world.register::<Pos>("Pos");
        world.register::<Vel>("Vel");

        let a = world.create_entity((Pos(1.0), Vel(2.0)));
        let b = world.create_entity((Pos(3.0), Vel(4.0)));
        assert_eq!(
            world.location(a).unwrap().archetype,
            world.location(b).unwrap().archetype
        );
        assert_eq!(world.archetypes().count(), 1);
    }

    #[test]
    fn destroy_updates_displaced_location() {
        let mut world = World::new();
        world.register::<Pos>("Pos");

        let a = world.create_entity((Pos(1.0),));
        let b = world.create_entity((Pos(2.0),));
        let a_loc = world.location(a).unwrap();

        assert!(world.destroy_entity(a, true));
        // b was swapped into a's slot
        assert_eq!(world.location(b), Some(a_loc));
        assert_eq!(world.get_component::<Pos>(b), Some(&Pos(2.0)));
        assert!(world.get_component::<Pos>(a).is_none());
    }

    #[test]
    fn unknown_ids_are_sentinels() {
        let mut world = World::new();
        world.register::<Pos>("Pos");
        let ghost = Entity(99);
        assert!(!world.destroy_entity(ghost, true));
        assert!(!world.set_component(ghost, Pos(0.0)));
        assert!(world.get_component::<Pos>(ghost).is_none());
    }

    #[test]
    fn type_locks_conflict_rules() {
        let mut world = World::new();
        let pos = world.register::<Pos>("Pos");

        assert!(world.lock_read(pos));
        assert!(world.lock_read(pos)); // readers stack
        assert!(!world.lock_write(pos));
        world.release_read(pos);
        world.release_read(pos);
        assert!(world.lock_write(pos));
        assert!(!world.lock_read(pos));
        world.release_write(pos);
    }
}
