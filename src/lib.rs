//! Comb is a chunked archetype entity-component store with a parallel,
//! chunk-granular job scheduler.
//!
//! Entities are opaque ids carrying a set of plain-data components.
//! Entities with an identical component type-set live in one *archetype*,
//! which stores them across fixed-size 16 KiB *chunks* in
//! struct-of-arrays layout, so iterating a query walks cache-linear
//! columns. *Shared* components are stored once per chunk: every entity in
//! a chunk carries the same shared values, and changing one migrates the
//! entity to a matching chunk.
//!
//! Systems declare their component access through typed views and run as
//! one task per matched chunk on a thread pool. Structural changes
//! requested during a tick are queued on the world's command buffer and
//! applied when the tick's last system group finishes. Worlds and single
//! entities round-trip through a compact byte-stream format.
//!
//! ```
//! use comb::prelude::*;
//!
//! #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! struct Position { x: f32, y: f32 }
//! #[derive(Clone, Copy, Debug, Default, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! world.register::<Position>("Position");
//! world.register::<Velocity>("Velocity");
//!
//! world.create_entity((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0, dy: 2.0 }));
//!
//! let mut scheduler = Scheduler::new();
//! scheduler.schedule(System::<(Write<Position>, Read<Velocity>), _>::new(
//!     "integrate",
//!     |_, chunk| {
//!         for (_, position, velocity) in chunk {
//!             position.x += velocity.dx;
//!             position.y += velocity.dy;
//!         }
//!     },
//! ));
//! scheduler.run_systems(&mut world);
//! ```

pub mod archetype;
pub mod chunk;
pub mod command;
pub mod entity;
pub mod insert;
pub mod prefab;
pub mod query;
pub mod registry;
pub mod schedule;
pub mod serialize;
pub mod typeset;
pub mod world;

pub use crate::archetype::{Archetype, SharedValue};
pub use crate::chunk::{Chunk, CHUNK_BYTES};
pub use crate::command::CommandBuffer;
pub use crate::entity::{Entity, EntityLoc};
pub use crate::insert::EntityBundle;
pub use crate::prefab::Prefab;
pub use crate::query::{ChunkIter, Read, View, ViewIter, ViewPart, ViewTuple, Write};
pub use crate::registry::{
    Component, ComponentKind, DeletedEntity, DontSaveEntity, Registry, RegistryError,
    TypeDescriptor, TypeIndex,
};
pub use crate::schedule::{Runnable, Scheduler, SchedulerOptions, System};
pub use crate::serialize::LoadError;
pub use crate::typeset::{TypeQuery, TypeSet};
pub use crate::world::World;

/// The handful of names most hosts use.
pub mod prelude {
    pub use crate::query::{Read, View, Write};
    pub use crate::registry::ComponentKind;
    pub use crate::schedule::{Scheduler, SchedulerOptions, System};
    pub use crate::typeset::TypeSet;
    pub use crate::{Entity, Prefab, SharedValue, World};
}
