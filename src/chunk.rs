//! Fixed-size struct-of-arrays storage blocks.
//!
//! A chunk is one 16 KiB allocation laid out as an entity-id array followed
//! by one column per non-shared component type and one singleton slot per
//! shared type. All chunks of an archetype share a [`ChunkLayout`], so the
//! column offsets and the capacity `N` are computed once per type-set.
//!
//! Elements `[0, len)` are live; everything above is uninitialized. Removal
//! swaps the last live element into the vacated slot so columns stay dense.

use crate::entity::Entity;
use crate::registry::{ComponentKind, Registry, TypeIndex};
use crate::typeset::TypeSet;
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

/// Total byte capacity of one chunk.
pub const CHUNK_BYTES: usize = 16 * 1024;

/// Alignment of the chunk allocation; component alignments may not exceed it.
const CHUNK_ALIGN: usize = 64;

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// One SoA column of a chunk.
#[derive(Clone)]
pub(crate) struct Column {
    pub type_index: TypeIndex,
    pub offset: usize,
    pub size: usize,
    pub align: usize,
    default_fn: unsafe fn(*mut u8),
    drop_fn: Option<unsafe fn(*mut u8)>,
}

/// One shared-component singleton slot of a chunk.
#[derive(Clone)]
pub(crate) struct SharedSlot {
    pub type_index: TypeIndex,
    pub offset: usize,
    pub size: usize,
    default_fn: unsafe fn(*mut u8),
    eq_fn: Option<unsafe fn(*const u8, *const u8) -> bool>,
}

/// The byte layout shared by every chunk of one archetype.
pub(crate) struct ChunkLayout {
    capacity: usize,
    columns: Vec<Column>,
    shared: Vec<SharedSlot>,
}

impl ChunkLayout {
    /// Computes the layout for an archetype's type-set.
    ///
    /// Zero-sized non-shared types get no column; their presence lives
    /// purely in the archetype's type-set. Columns are laid out in
    /// ascending registry-index order, each padded to its alignment.
    pub fn new(registry: &Registry, types: &TypeSet) -> Self {
        let mut columns = Vec::new();
        let mut shared = Vec::new();
        let mut shared_bytes = 0usize;
        let mut per_entity = std::mem::size_of::<Entity>();
        let mut max_align = 0usize;
        let mut slot_count = 0usize;

        // type-set iteration is ascending, which fixes the column order
        for type_index in types.iter() {
            let descriptor = registry.descriptor(type_index);
            debug_assert!(
                descriptor.align() <= CHUNK_ALIGN,
                "component {} over-aligned for chunk storage",
                descriptor.name()
            );
            if descriptor.kind() == ComponentKind::Shared {
                shared.push(descriptor);
                shared_bytes += descriptor.size();
                max_align = max_align.max(descriptor.align());
                slot_count += 1;
            } else if descriptor.size() > 0 {
                columns.push(descriptor);
                per_entity += descriptor.size();
                max_align = max_align.max(descriptor.align());
                slot_count += 1;
            }
        }

        let usable = CHUNK_BYTES - shared_bytes - max_align * slot_count;
        let capacity = usable / per_entity;
        debug_assert!(capacity > 0, "type-set too large for one chunk element");

        let mut offset = capacity * std::mem::size_of::<Entity>();
        let columns = columns
            .into_iter()
            .map(|descriptor| {
                offset = align_up(offset, descriptor.align());
                let column = Column {
                    type_index: descriptor.index(),
                    offset,
                    size: descriptor.size(),
                    align: descriptor.align(),
                    default_fn: descriptor.default_fn(),
                    drop_fn: descriptor.drop_fn(),
                };
                offset += capacity * descriptor.size();
                column
            })
            .collect();
        let shared = shared
            .into_iter()
            .map(|descriptor| {
                offset = align_up(offset, descriptor.align().max(1));
                let slot = SharedSlot {
                    type_index: descriptor.index(),
                    offset,
                    size: descriptor.size(),
                    default_fn: descriptor.default_fn(),
                    eq_fn: descriptor.eq_fn(),
                };
                offset += descriptor.size();
                slot
            })
            .collect();
        debug_assert!(offset <= CHUNK_BYTES);

        Self {
            capacity,
            columns,
            shared,
        }
    }

    /// The maximum number of entities a chunk of this layout can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn shared_slots(&self) -> &[SharedSlot] {
        &self.shared
    }

    fn column(&self, type_index: TypeIndex) -> Option<&Column> {
        self.columns.iter().find(|c| c.type_index == type_index)
    }

    fn shared_slot(&self, type_index: TypeIndex) -> Option<&SharedSlot> {
        self.shared.iter().find(|s| s.type_index == type_index)
    }
}

/// A fixed-capacity block of entities which all carry the archetype's
/// component types and identical shared-component values.
pub struct Chunk {
    data: NonNull<u8>,
    len: usize,
    layout: Arc<ChunkLayout>,
}

// Safety: the chunk exclusively owns its allocation; all aliasing of column
// data is governed by the world's type-lock discipline.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    pub(crate) fn new(layout: Arc<ChunkLayout>) -> Self {
        let alloc_layout = Layout::from_size_align(CHUNK_BYTES, CHUNK_ALIGN).unwrap();
        // Safety: CHUNK_BYTES is non-zero.
        let data = unsafe { alloc(alloc_layout) };
        let data = NonNull::new(data).unwrap_or_else(|| std::alloc::handle_alloc_error(alloc_layout));

        let chunk = Self {
            data,
            len: 0,
            layout,
        };
        // shared singletons exist for the chunk's whole lifetime
        for slot in chunk.layout.shared_slots() {
            unsafe { (slot.default_fn)(chunk.data.as_ptr().add(slot.offset)) };
        }
        chunk
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len == self.layout.capacity
    }

    pub(crate) fn layout(&self) -> &Arc<ChunkLayout> {
        &self.layout
    }

    /// The live entity ids stored in this chunk.
    pub fn entities(&self) -> &[Entity] {
        // Safety: ids [0, len) are always initialized.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr() as *const Entity, self.len) }
    }

    pub(crate) fn entity_ids_ptr(&self) -> *mut Entity {
        self.data.as_ptr() as *mut Entity
    }

    /// Base pointer of the column storing `type_index`, if the layout has
    /// one (zero-sized and shared types do not).
    pub(crate) fn column_base(&self, type_index: TypeIndex) -> Option<(*mut u8, usize)> {
        self.layout
            .column(type_index)
            .map(|column| (unsafe { self.data.as_ptr().add(column.offset) }, column.size))
    }

    fn column_slot(&self, column: &Column, element: usize) -> *mut u8 {
        unsafe { self.data.as_ptr().add(column.offset + element * column.size) }
    }

    /// Pointer to one element of one column.
    pub(crate) fn component_slot(&self, type_index: TypeIndex, element: usize) -> Option<*mut u8> {
        debug_assert!(element < self.len);
        self.layout
            .column(type_index)
            .map(|column| self.column_slot(column, element))
    }

    /// Appends `id` with default-constructed components. The caller ensures
    /// there is capacity.
    pub(crate) fn push(&mut self, id: Entity) -> usize {
        debug_assert!(!self.is_full());
        let element = self.len;
        unsafe {
            *self.entity_ids_ptr().add(element) = id;
            for column in self.layout.columns() {
                (column.default_fn)(self.column_slot(column, element));
            }
        }
        self.len += 1;
        element
    }

    /// Overwrites one component of a live element with the value at `src`,
    /// dropping the previous value.
    ///
    /// # Safety
    /// `src` must point to an initialized value of the column's type; the
    /// value is moved out of `src` and must not be dropped by the caller.
    pub(crate) unsafe fn write_component(
        &mut self,
        type_index: TypeIndex,
        element: usize,
        src: *const u8,
    ) {
        debug_assert!(element < self.len);
        if let Some(column) = self.layout.column(type_index) {
            let slot = self.column_slot(column, element);
            if let Some(drop_fn) = column.drop_fn {
                drop_fn(slot);
            }
            std::ptr::copy_nonoverlapping(src, slot, column.size);
        }
    }

    /// Drops one component of a live element in place, leaving the slot
    /// uninitialized. Used before a swap-free pop during migration.
    pub(crate) fn drop_component(&mut self, type_index: TypeIndex, element: usize) {
        debug_assert!(element < self.len);
        if let Some(column) = self.layout.column(type_index) {
            if let Some(drop_fn) = column.drop_fn {
                unsafe { drop_fn(self.column_slot(column, element)) };
            }
        }
    }

    /// Removes the element at `element`, swapping the last live element into
    /// its place. Returns the id of the entity that moved, or `None` when
    /// the tail was removed.
    ///
    /// With `drop_element` false the removed slot is treated as already
    /// moved out (its components are not dropped).
    pub(crate) fn pop_swap(&mut self, element: usize, drop_element: bool) -> Option<Entity> {
        debug_assert!(element < self.len);
        let last = self.len - 1;
        unsafe {
            if drop_element {
                for column in self.layout.columns() {
                    if let Some(drop_fn) = column.drop_fn {
                        drop_fn(self.column_slot(column, element));
                    }
                }
            }
            self.len = last;
            if element == last {
                return None;
            }
            let moved = *self.entity_ids_ptr().add(last);
            *self.entity_ids_ptr().add(element) = moved;
            for column in self.layout.columns() {
                std::ptr::copy_nonoverlapping(
                    self.column_slot(column, last),
                    self.column_slot(column, element),
                    column.size,
                );
            }
            Some(moved)
        }
    }

    /// Moves one entity in from another chunk: the entity id is copied, and
    /// every column of this layout is either moved from the source's column
    /// of the same type or default-initialized when the source lacks it.
    ///
    /// The source slot is left untouched; the caller pops it afterwards
    /// without dropping the moved components. Shared singletons are not
    /// consulted — the caller has already selected a chunk whose shared
    /// values match.
    pub(crate) fn move_in(&mut self, src: &Chunk, src_element: usize) -> usize {
        debug_assert!(!self.is_full());
        debug_assert!(src_element < src.len);
        let element = self.len;
        unsafe {
            *self.entity_ids_ptr().add(element) = *src.entity_ids_ptr().add(src_element);
            for column in self.layout.columns() {
                let slot = self.column_slot(column, element);
                match src.layout.column(column.type_index) {
                    Some(src_column) => std::ptr::copy_nonoverlapping(
                        src.column_slot(src_column, src_element),
                        slot,
                        column.size,
                    ),
                    None => (column.default_fn)(slot),
                }
            }
        }
        self.len += 1;
        element
    }

    /// Pointer to the singleton slot of a shared type.
    pub(crate) fn shared_ptr(&self, type_index: TypeIndex) -> Option<*mut u8> {
        self.layout
            .shared_slot(type_index)
            .map(|slot| unsafe { self.data.as_ptr().add(slot.offset) })
    }

    /// Compares the singleton of `type_index` against `value`, using the
    /// type's registered equality or a bytewise comparison.
    pub(crate) fn shared_eq(&self, type_index: TypeIndex, value: *const u8) -> bool {
        let Some(slot) = self.layout.shared_slot(type_index) else {
            return false;
        };
        let ours = unsafe { self.data.as_ptr().add(slot.offset) as *const u8 };
        unsafe {
            match slot.eq_fn {
                Some(eq) => eq(ours, value),
                None => {
                    std::slice::from_raw_parts(ours, slot.size)
                        == std::slice::from_raw_parts(value, slot.size)
                }
            }
        }
    }

    /// Overwrites the singleton slot of a shared type.
    ///
    /// # Safety
    /// `src` must point to an initialized value of the slot's type. Shared
    /// types are trivially copyable, so the old value needs no drop.
    pub(crate) unsafe fn set_shared_bytes(&mut self, type_index: TypeIndex, src: *const u8) {
        if let Some(slot) = self.layout.shared_slot(type_index) {
            std::ptr::copy_nonoverlapping(src, self.data.as_ptr().add(slot.offset), slot.size);
        }
    }

    /// Declares the first `len` elements initialized. Stream loading writes
    /// ids and column bytes directly, then publishes them with this.
    ///
    /// # Safety
    /// Ids and all columns for `[0, len)` must be initialized.
    pub(crate) unsafe fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.layout.capacity);
        self.len = len;
    }

    /// Default-constructs all columns for elements `[0, count)`. Used by
    /// stream loading before columns are overwritten from the stream.
    pub(crate) fn init_elements_default(&mut self, count: usize) {
        debug_assert!(count <= self.layout.capacity);
        for column in self.layout.columns() {
            for element in 0..count {
                unsafe { (column.default_fn)(self.column_slot(column, element)) };
            }
        }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe {
            for column in self.layout.columns() {
                if let Some(drop_fn) = column.drop_fn {
                    for element in 0..self.len {
                        drop_fn(self.column_slot(column, element));
                    }
                }
            }
            dealloc(
                self.data.as_ptr(),
                Layout::from_size_align(CHUNK_BYTES, CHUNK_ALIGN).unwrap(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentKind;

    #[derive(Default, Clone, Copy, PartialEq, Debug)]
    struct Pos {
        x: f32,
        y: f32,
    }
    #[derive(Default, Clone, Copy, PartialEq, Debug)]
    struct Mass(f64);
    #[derive(Default, Clone, Copy, PartialEq)]
    struct Team(u32);

    fn registry() -> (Registry, TypeIndex, TypeIndex, TypeIndex) {
        let mut registry = Registry::new();
        let pos = registry.register::<Pos>("Pos", ComponentKind::Regular).unwrap();
        let mass = registry.register::<Mass>("Mass", ComponentKind::Regular).unwrap();
        let team = registry.register_shared::<Team>("Team").unwrap();
        (registry, pos, mass, team)
    }

    fn type_set(indices: &[TypeIndex]) -> TypeSet {
        indices.iter().copied().collect()
    }

    #[test]
    fn capacity_is_deterministic() {
        let (registry, pos, mass, team) = registry();
        let types = type_set(&[pos, mass, team]);
        let a = ChunkLayout::new(&registry, &types);
        let b = ChunkLayout::new(&registry, &types);
        assert_eq!(a.capacity(), b.capacity());

        // usable = 16384 - 4 (Team) - 8 * 3; per-entity = 8 + 8 + 8
        assert_eq!(a.capacity(), (CHUNK_BYTES - 4 - 8 * 3) / 24);
    }

    #[test]
    fn columns_are_aligned() {
        let (registry, pos, mass, team) = registry();
        let layout = ChunkLayout::new(&registry, &type_set(&[pos, mass, team]));
        for column in layout.columns() {
            assert_eq!(column.offset % column.align, 0);
        }
        assert!(layout.columns().windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[test]
    fn push_then_pop_tail() {
        let (registry, pos, mass, _) = registry();
        let layout = Arc::new(ChunkLayout::new(&registry, &type_set(&[pos, mass])));
        let mut chunk = Chunk::new(layout);

        assert_eq!(chunk.push(Entity(1)), 0);
        assert_eq!(chunk.push(Entity(2)), 1);
        assert_eq!(chunk.entities(), &[Entity(1), Entity(2)]);

        // deleting the tail moves nobody
        assert_eq!(chunk.pop_swap(1, true), None);
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn pop_swap_reports_moved_entity() {
        let (registry, pos, _, _) = registry();
        let layout = Arc::new(ChunkLayout::new(&registry, &type_set(&[pos])));
        let mut chunk = Chunk::new(layout);
        for id in 1..=3 {
            chunk.push(Entity(id));
        }

        assert_eq!(chunk.pop_swap(0, true), Some(Entity(3)));
        assert_eq!(chunk.entities(), &[Entity(3), Entity(2)]);
    }

    #[test]
    fn move_in_carries_common_columns() {
        let (registry, pos, mass, _) = registry();
        let src_layout = Arc::new(ChunkLayout::new(&registry, &type_set(&[pos])));
        let dst_layout = Arc::new(ChunkLayout::new(&registry, &type_set(&[pos, mass])));
        let mut src = Chunk::new(src_layout);
        let mut dst = Chunk::new(dst_layout);

        let element = src.push(Entity(9));
        let value = Pos { x: 1.5, y: -2.0 };
        unsafe {
            src.write_component(pos, element, &value as *const Pos as *const u8);
        }

        let moved_to = dst.move_in(&src, element);
        src.pop_swap(element, false);

        assert_eq!(dst.entities(), &[Entity(9)]);
        let slot = dst.component_slot(pos, moved_to).unwrap();
        assert_eq!(unsafe { *(slot as *const Pos) }, value);
        // the column absent in the source is default-initialized
        let slot = dst.component_slot(mass, moved_to).unwrap();
        assert_eq!(unsafe { *(slot as *const Mass) }, Mass(0.0));
    }

    #[test]
    fn shared_singleton_round_trip() {
        let (registry, pos, _, team) = registry();
        let layout = Arc::new(ChunkLayout::new(&registry, &type_set(&[pos, team])));
        let mut chunk = Chunk::new(layout);

        let default = Team(0);
        let forty_two = Team(42);
        assert!(chunk.shared_eq(team, &default as *const Team as *const u8));
        unsafe { chunk.set_shared_bytes(team, &forty_two as *const Team as *const u8) };
        assert!(chunk.shared_eq(team, &forty_two as *const Team as *const u8));
        assert!(!chunk.shared_eq(team, &default as *const Team as *const u8));
    }
}
