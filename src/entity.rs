use std::fmt::{self, Display};

/// An opaque handle to an entity stored in a [`World`](crate::World).
///
/// Real entities carry positive ids. Negative ids are temporary placeholders
/// issued by the command buffer and remapped to real ids when the buffer is
/// drained; they are never present in the world's location map.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Entity(pub i64);

impl Entity {
    /// Returns `true` if this id is a command-buffer placeholder.
    #[inline]
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The storage location of an entity: which archetype, which chunk within
/// that archetype, and which element within that chunk.
///
/// An entity is at exactly one location at all times; the world's location
/// map is the sole index from id to location.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EntityLoc {
    pub archetype: u32,
    pub chunk: u32,
    pub element: u32,
}

impl EntityLoc {
    pub(crate) fn new(archetype: usize, chunk: usize, element: usize) -> Self {
        Self {
            archetype: archetype as u32,
            chunk: chunk as u32,
            element: element as u32,
        }
    }
}

impl Display for EntityLoc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}/{}", self.archetype, self.chunk, self.element)
    }
}
