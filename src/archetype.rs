//! Archetypes: the set of entities sharing one exact component type-set.
//!
//! An archetype owns a growable list of chunk slots. Slots may be holes
//! (freed chunks); the slot index identifies a chunk for as long as it
//! lives, holes are reused before the list grows, and trailing holes are
//! trimmed. At most one chunk per archetype is the "currently filling"
//! chunk, which keeps insertions local.

use crate::chunk::{Chunk, ChunkLayout};
use crate::entity::Entity;
use crate::registry::{Registry, TypeIndex};
use crate::typeset::{TypeQuery, TypeSet};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

/// An owned value of a shared component, used to select or initialize the
/// chunk an entity lands in.
#[derive(Clone, Debug)]
pub struct SharedValue {
    type_index: TypeIndex,
    bytes: SmallVec<[u8; 16]>,
}

impl SharedValue {
    /// Captures a typed shared value. Returns `None` when `T` is not
    /// registered.
    pub fn of<T: crate::registry::Component + Copy>(registry: &Registry, value: &T) -> Option<Self> {
        let type_index = registry.lookup::<T>()?;
        debug_assert_eq!(registry.descriptor(type_index).size(), std::mem::size_of::<T>());
        Some(unsafe { Self::from_raw(type_index, value as *const T as *const u8, std::mem::size_of::<T>()) })
    }

    /// Copies `size` bytes out of `ptr` as a value of `type_index`.
    ///
    /// # Safety
    /// `ptr` must point to an initialized, trivially-copyable value of the
    /// type `type_index` refers to.
    pub(crate) unsafe fn from_raw(type_index: TypeIndex, ptr: *const u8, size: usize) -> Self {
        Self {
            type_index,
            bytes: SmallVec::from_slice(std::slice::from_raw_parts(ptr, size)),
        }
    }

    pub fn type_index(&self) -> TypeIndex {
        self.type_index
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }
}

/// All entities whose component type-set equals `types`, stored across this
/// archetype's chunks.
pub struct Archetype {
    index: usize,
    types: TypeSet,
    layout: Arc<ChunkLayout>,
    chunks: Vec<Option<Chunk>>,
    filling: Option<usize>,
}

impl Archetype {
    pub(crate) fn new(index: usize, types: TypeSet, registry: &Registry) -> Self {
        let layout = Arc::new(ChunkLayout::new(registry, &types));
        debug!(archetype = index, capacity = layout.capacity(), "created archetype");
        Self {
            index,
            types,
            layout,
            chunks: Vec::new(),
            filling: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn types(&self) -> &TypeSet {
        &self.types
    }

    pub(crate) fn layout(&self) -> &Arc<ChunkLayout> {
        &self.layout
    }

    /// Whether this archetype's type-set satisfies the query.
    pub fn matches(&self, query: &TypeQuery) -> bool {
        query.matches(&self.types)
    }

    /// The number of chunk slots, holes included.
    pub fn chunk_slot_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index).and_then(|slot| slot.as_ref())
    }

    pub(crate) fn chunk_mut(&mut self, index: usize) -> &mut Chunk {
        self.chunks[index].as_mut().expect("chunk slot is a hole")
    }

    /// Iterates live chunks with their slot indices.
    pub fn chunks(&self) -> impl Iterator<Item = (usize, &Chunk)> {
        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|chunk| (i, chunk)))
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|slot| slot.is_none())
    }

    /// The number of live entities across all chunks.
    pub fn entity_count(&self) -> usize {
        self.chunks().map(|(_, chunk)| chunk.len()).sum()
    }

    fn chunk_matches(chunk: &Chunk, shared: &[SharedValue]) -> bool {
        shared.iter().all(|value| {
            match chunk.shared_ptr(value.type_index) {
                Some(_) => chunk.shared_eq(value.type_index, value.as_ptr()),
                // values for types this archetype does not share are ignored
                None => true,
            }
        })
    }

    /// Selects a chunk with free space whose shared singletons equal
    /// `shared` for every type this archetype actually shares, creating one
    /// when no such chunk exists. The selected chunk becomes the
    /// currently-filling chunk.
    pub(crate) fn select_chunk_for(&mut self, shared: &[SharedValue]) -> usize {
        if let Some(index) = self.filling {
            if let Some(chunk) = self.chunk(index) {
                if !chunk.is_full() && Self::chunk_matches(chunk, shared) {
                    return index;
                }
            }
        }

        let scanned = self
            .chunks()
            .find(|(_, chunk)| !chunk.is_full() && Self::chunk_matches(chunk, shared))
            .map(|(index, _)| index);
        if let Some(index) = scanned {
            self.filling = Some(index);
            return index;
        }

        let mut chunk = Chunk::new(self.layout.clone());
        for value in shared {
            // slots the layout lacks are skipped inside set_shared_bytes
            unsafe { chunk.set_shared_bytes(value.type_index(), value.as_ptr()) };
        }

        let index = match self.chunks.iter().position(|slot| slot.is_none()) {
            Some(hole) => {
                self.chunks[hole] = Some(chunk);
                hole
            }
            None => {
                self.chunks.push(Some(chunk));
                self.chunks.len() - 1
            }
        };
        debug!(archetype = self.index, chunk = index, "allocated chunk");
        self.filling = Some(index);
        index
    }

    /// Places a new entity, returning `(chunk, element)`.
    pub(crate) fn allocate(&mut self, id: Entity, shared: &[SharedValue]) -> (usize, usize) {
        let chunk_index = self.select_chunk_for(shared);
        let element = self.chunk_mut(chunk_index).push(id);
        (chunk_index, element)
    }

    /// Copies the shared singleton tuple of `chunk_index`, with the types in
    /// `overrides` replaced by the given values. This is the target tuple of
    /// a shared-component change.
    pub(crate) fn merged_shared_values(
        &self,
        chunk_index: usize,
        overrides: &[SharedValue],
    ) -> SmallVec<[SharedValue; 2]> {
        let chunk = self.chunk(chunk_index).expect("chunk slot is a hole");
        self.layout
            .shared_slots()
            .iter()
            .map(|slot| {
                overrides
                    .iter()
                    .find(|value| value.type_index() == slot.type_index)
                    .cloned()
                    .unwrap_or_else(|| unsafe {
                        SharedValue::from_raw(
                            slot.type_index,
                            chunk.shared_ptr(slot.type_index).unwrap(),
                            slot.size,
                        )
                    })
            })
            .collect()
    }

    /// Changes the shared values of one entity, migrating it to a matching
    /// chunk when any value actually differs.
    ///
    /// Returns the entity's new `(chunk, element)` plus the id displaced
    /// into its old slot by the source-chunk pop, if any.
    pub(crate) fn set_shared(
        &mut self,
        chunk_index: usize,
        element: usize,
        new_values: &[SharedValue],
    ) -> ((usize, usize), Option<Entity>) {
        let src = self.chunk(chunk_index).expect("chunk slot is a hole");
        let unchanged = new_values
            .iter()
            .all(|value| match src.shared_ptr(value.type_index()) {
                Some(_) => src.shared_eq(value.type_index(), value.as_ptr()),
                None => false,
            });
        if unchanged {
            return ((chunk_index, element), None);
        }

        let merged = self.merged_shared_values(chunk_index, new_values);
        let dst_index = self.select_chunk_for(&merged);
        debug_assert_ne!(dst_index, chunk_index);
        let (dst_element, displaced) = self.move_between(chunk_index, dst_index, element);
        ((dst_index, dst_element), displaced)
    }

    /// Moves one entity between two chunks of this archetype. Every column
    /// moves, so the source slot is popped without dropping.
    fn move_between(
        &mut self,
        src_index: usize,
        dst_index: usize,
        element: usize,
    ) -> (usize, Option<Entity>) {
        debug_assert_ne!(src_index, dst_index);
        let mut src = self.chunks[src_index].take().expect("chunk slot is a hole");
        let dst = self.chunks[dst_index].as_mut().expect("chunk slot is a hole");

        let dst_element = dst.move_in(&src, element);
        let displaced = src.pop_swap(element, false);

        self.chunks[src_index] = Some(src);
        self.release_chunk_if_empty(src_index);
        (dst_element, displaced)
    }

    /// Removes one entity, dropping its components. Returns the id swapped
    /// into the vacated slot, if any.
    pub(crate) fn delete_entity(&mut self, chunk_index: usize, element: usize) -> Option<Entity> {
        let displaced = self.chunk_mut(chunk_index).pop_swap(element, true);
        self.release_chunk_if_empty(chunk_index);
        displaced
    }

    /// Frees the chunk slot when its chunk has emptied and trims trailing
    /// holes off the slot list.
    pub(crate) fn release_chunk_if_empty(&mut self, chunk_index: usize) {
        let emptied = self
            .chunk(chunk_index)
            .map(|chunk| chunk.is_empty())
            .unwrap_or(false);
        if !emptied {
            return;
        }

        self.chunks[chunk_index] = None;
        if self.filling == Some(chunk_index) {
            self.filling = None;
        }
        while matches!(self.chunks.last(), Some(None)) {
            self.chunks.pop();
        }
        debug!(archetype = self.index, chunk = chunk_index, "released chunk");
    }

    /// Adds a pre-built chunk (stream loading), returning its slot index.
    pub(crate) fn adopt_chunk(&mut self, chunk: Chunk) -> usize {
        match self.chunks.iter().position(|slot| slot.is_none()) {
            Some(hole) => {
                self.chunks[hole] = Some(chunk);
                hole
            }
            None => {
                self.chunks.push(Some(chunk));
                self.chunks.len() - 1
            }
        }
    }
}
