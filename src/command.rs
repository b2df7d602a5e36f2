//! Deferred structural mutation.
//!
//! Systems run against `&World` and therefore cannot mutate structure
//! directly. Instead they enqueue commands here; the scheduler drains the
//! buffer in FIFO order once all system groups of a tick have finished —
//! the single serialization point for structural changes.
//!
//! Commands may refer to entities that do not exist yet: `create` hands out
//! a temporary negative id immediately, and at drain time every command
//! translates temporary ids through the remapping table the create filled
//! in.

use crate::entity::Entity;
use crate::insert::EntityBundle;
use crate::prefab::Prefab;
use crate::registry::Component;
use crate::typeset::TypeSet;
use crate::world::World;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A queued structural mutation, applied against the world at drain time.
pub(crate) trait WorldCommand: Send {
    fn run(self: Box<Self>, world: &mut World);
}

/// A mutex-guarded FIFO of structural mutations plus the temp-id counter.
pub struct CommandBuffer {
    queue: Mutex<Vec<Box<dyn WorldCommand>>>,
    next_temp: AtomicI64,
}

impl CommandBuffer {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            next_temp: AtomicI64::new(-1),
        }
    }

    fn push(&self, command: Box<dyn WorldCommand>) {
        self.queue.lock().push(command);
    }

    pub(crate) fn take_queued(&self) -> Vec<Box<dyn WorldCommand>> {
        std::mem::take(&mut *self.queue.lock())
    }

    /// The number of queued commands.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    fn next_temp_id(&self) -> Entity {
        Entity(self.next_temp.fetch_sub(1, Ordering::Relaxed))
    }

    /// Enqueues entity creation and returns the temporary id later commands
    /// may refer to. The temporary id maps to the real one at drain time.
    pub fn create<B: EntityBundle + Send + 'static>(&self, bundle: B) -> Entity {
        let temp = self.next_temp_id();
        self.push(Box::new(Create { temp, bundle: Some(bundle) }));
        temp
    }

    /// Enqueues instantiation of a prefab.
    pub fn create_from_prefab(&self, prefab: Arc<Prefab>) -> Entity {
        let temp = self.next_temp_id();
        self.push(Box::new(CreateFromPrefab { temp, prefab }));
        temp
    }

    /// Enqueues entity destruction (state components preserved).
    pub fn destroy(&self, id: Entity) {
        self.push(Box::new(Destroy { id }));
    }

    /// Enqueues an in-place component assignment.
    pub fn set_component<T: Component>(&self, id: Entity, value: T) {
        self.push(Box::new(SetComponent { id, value: Some(value) }));
    }

    /// Enqueues a component addition.
    pub fn add_component<T: Component>(&self, id: Entity, value: T) {
        self.push(Box::new(AddComponent { id, value: Some(value) }));
    }

    /// Enqueues a shared-component change.
    pub fn set_shared<T: Component>(&self, id: Entity, value: T) {
        self.push(Box::new(SetShared { id, value: Some(value) }));
    }

    /// Enqueues removal of the given component types.
    pub fn remove_components(&self, id: Entity, types: TypeSet) {
        self.push(Box::new(RemoveComponents { id, types }));
    }

    /// Enqueues replacement of the entity's whole type-set.
    pub fn change_components(&self, id: Entity, types: TypeSet) {
        self.push(Box::new(ChangeComponents { id, types }));
    }
}

struct Create<B> {
    temp: Entity,
    bundle: Option<B>,
}

impl<B: EntityBundle + Send + 'static> WorldCommand for Create<B> {
    fn run(mut self: Box<Self>, world: &mut World) {
        let real = world.create_entity(self.bundle.take().unwrap());
        world.remember_temp(self.temp, real);
    }
}

struct CreateFromPrefab {
    temp: Entity,
    prefab: Arc<Prefab>,
}

impl WorldCommand for CreateFromPrefab {
    fn run(self: Box<Self>, world: &mut World) {
        let real = world.instantiate(&self.prefab);
        world.remember_temp(self.temp, real);
    }
}

struct Destroy {
    id: Entity,
}

impl WorldCommand for Destroy {
    fn run(self: Box<Self>, world: &mut World) {
        let id = world.resolve_temp(self.id);
        world.destroy_entity(id, true);
    }
}

struct SetComponent<T> {
    id: Entity,
    value: Option<T>,
}

impl<T: Component> WorldCommand for SetComponent<T> {
    fn run(mut self: Box<Self>, world: &mut World) {
        let id = world.resolve_temp(self.id);
        world.set_component(id, self.value.take().unwrap());
    }
}

struct AddComponent<T> {
    id: Entity,
    value: Option<T>,
}

impl<T: Component> WorldCommand for AddComponent<T> {
    fn run(mut self: Box<Self>, world: &mut World) {
        let id = world.resolve_temp(self.id);
        world.add_component(id, self.value.take().unwrap());
    }
}

struct SetShared<T> {
    id: Entity,
    value: Option<T>,
}

impl<T: Component> WorldCommand for SetShared<T> {
    fn run(mut self: Box<Self>, world: &mut World) {
        let id = world.resolve_temp(self.id);
        world.set_shared(id, self.value.take().unwrap());
    }
}

struct RemoveComponents {
    id: Entity,
    types: TypeSet,
}

impl WorldCommand for RemoveComponents {
    fn run(self: Box<Self>, world: &mut World) {
        let id = world.resolve_temp(self.id);
        world.remove_components(id, &self.types);
    }
}

struct ChangeComponents {
    id: Entity,
    types: TypeSet,
}

impl WorldCommand for ChangeComponents {
    fn run(self: Box<Self>, world: &mut World) {
        let id = world.resolve_temp(self.id);
        world.change_components(id, &self.types);
    }
}
