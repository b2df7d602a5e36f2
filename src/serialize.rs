//! Stream persistence for worlds and prefabs.
//!
//! The wire format is byte-oriented over any `std::io::{Read, Write}` pair.
//! All integers are fixed-width little-endian: `u64` counts and lengths,
//! `i32` type indices and location fields, `i64` entity ids. Component
//! payloads are raw value bytes, so only trivially-copyable components
//! participate; others are skipped at save time.
//!
//! Every stream opens with a registry preamble mapping the writing
//! process's type indices to names. Loading resolves each name against the
//! current registry, so indices may differ between save and load. A name
//! the current registry does not know fails the whole load: the chunk wire
//! form carries no per-column byte length, so an unknown type's extent
//! cannot be skipped over.
//!
//! World saves merge archetypes whose savable type-sets are equal (they
//! differ only in `DontSave`/`State` components) into one logical
//! archetype, rewriting the trailing entity-location map to match.
//! Archetypes containing `DontSaveEntity` are skipped wholly.

use crate::archetype::{Archetype, SharedValue};
use crate::chunk::{Chunk, ChunkLayout};
use crate::entity::{Entity, EntityLoc};
use crate::prefab::Prefab;
use crate::registry::{ComponentKind, Registry, TypeIndex};
use crate::typeset::TypeSet;
use crate::world::World;
use std::io::{self, Read, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by stream loading. A failed load on a fresh world leaves
/// it empty; it never poisons existing state beyond the reset the load
/// itself performs.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
    #[error("stream references unknown component type {0:?}")]
    UnknownType(String),
    #[error("malformed stream: {0}")]
    Corrupt(&'static str),
}

const MAX_TYPE_NAME: u64 = 1 << 16;

// ---- little-endian primitives ----------------------------------------

fn write_u64<W: Write>(w: &mut W, value: u64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn write_i64<W: Write>(w: &mut W, value: i64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn write_i32<W: Write>(w: &mut W, value: i32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    r.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut bytes = [0u8; 8];
    r.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut bytes = [0u8; 4];
    r.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

fn read_vec<R: Read>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

// ---- registry preamble -----------------------------------------------

fn write_preamble<W: Write>(registry: &Registry, w: &mut W) -> io::Result<()> {
    write_u64(w, registry.len() as u64)?;
    for descriptor in registry.iter() {
        write_i32(w, descriptor.index().0 as i32)?;
        write_u64(w, descriptor.name().len() as u64)?;
        w.write_all(descriptor.name().as_bytes())?;
    }
    Ok(())
}

/// The writing process's type table, resolved by name against the current
/// registry.
struct LoadedTypes {
    by_loaded_index: Vec<(String, Option<TypeIndex>)>,
}

impl LoadedTypes {
    fn resolve(&self, loaded: i32) -> Result<TypeIndex, LoadError> {
        let entry = self
            .by_loaded_index
            .get(usize::try_from(loaded).map_err(|_| LoadError::Corrupt("negative type index"))?)
            .ok_or(LoadError::Corrupt("type index out of preamble range"))?;
        entry
            .1
            .ok_or_else(|| LoadError::UnknownType(entry.0.clone()))
    }
}

fn read_preamble<R: Read>(registry: &Registry, r: &mut R) -> Result<LoadedTypes, LoadError> {
    let count = read_u64(r)? as usize;
    let mut by_loaded_index = vec![(String::new(), None); count];
    for _ in 0..count {
        let index = read_i32(r)?;
        let name_len = read_u64(r)?;
        if name_len > MAX_TYPE_NAME {
            return Err(LoadError::Corrupt("type name too long"));
        }
        let name = String::from_utf8(read_vec(r, name_len as usize)?)
            .map_err(|_| LoadError::Corrupt("type name is not utf-8"))?;
        let slot = by_loaded_index
            .get_mut(usize::try_from(index).map_err(|_| LoadError::Corrupt("negative type index"))?)
            .ok_or(LoadError::Corrupt("type index out of preamble range"))?;
        *slot = (name.clone(), registry.lookup_by_name(&name));
    }
    Ok(LoadedTypes { by_loaded_index })
}

// ---- type-set wire form ----------------------------------------------

fn write_type_set<W: Write>(w: &mut W, set: &TypeSet) -> io::Result<()> {
    let bytes = set.wire_bytes();
    write_u64(w, bytes.len() as u64)?;
    w.write_all(&bytes)
}

fn write_empty_type_set<W: Write>(w: &mut W) -> io::Result<()> {
    write_u64(w, 0)
}

fn read_type_set<R: Read>(r: &mut R, types: &LoadedTypes) -> Result<TypeSet, LoadError> {
    let len = read_u64(r)?;
    if len > (MAX_TYPE_NAME * 8) {
        return Err(LoadError::Corrupt("type-set bitmap too long"));
    }
    let raw = TypeSet::from_wire_bytes(&read_vec(r, len as usize)?);
    let mut remapped = TypeSet::new();
    for loaded in raw.iter() {
        remapped.insert(types.resolve(loaded.0 as i32)?);
    }
    Ok(remapped)
}

// ---- chunk wire form -------------------------------------------------

fn write_chunk<W: Write>(w: &mut W, registry: &Registry, chunk: &Chunk) -> io::Result<()> {
    write_i32(w, chunk.len() as i32)?;
    for id in chunk.entities() {
        write_i64(w, id.0)?;
    }

    for column in chunk.layout().columns() {
        let descriptor = registry.descriptor(column.type_index);
        if !descriptor.is_savable() || !descriptor.is_trivial() {
            continue;
        }
        write_i32(w, column.type_index.0 as i32)?;
        let (base, size) = chunk.column_base(column.type_index).unwrap();
        // Safety: [0, len) elements of every column are initialized, and
        // trivial types are valid as raw bytes.
        let bytes = unsafe { std::slice::from_raw_parts(base as *const u8, chunk.len() * size) };
        w.write_all(bytes)?;
    }
    write_i32(w, -1)?;

    for slot in chunk.layout().shared_slots() {
        let descriptor = registry.descriptor(slot.type_index);
        if !descriptor.is_savable() || !descriptor.is_trivial() {
            continue;
        }
        write_i32(w, slot.type_index.0 as i32)?;
        let base = chunk.shared_ptr(slot.type_index).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(base as *const u8, slot.size) };
        w.write_all(bytes)?;
    }
    write_i32(w, -1)
}

fn read_chunk<R: Read>(
    r: &mut R,
    registry: &Registry,
    layout: &Arc<ChunkLayout>,
    types: &LoadedTypes,
) -> Result<Chunk, LoadError> {
    let mut chunk = Chunk::new(layout.clone());

    let count = read_i32(r)?;
    if count < 0 || count as usize > layout.capacity() {
        return Err(LoadError::Corrupt("chunk entity count out of range"));
    }
    let count = count as usize;
    for element in 0..count {
        let id = Entity(read_i64(r)?);
        // Safety: writing into the id array below the published length.
        unsafe { *chunk.entity_ids_ptr().add(element) = id };
    }
    chunk.init_elements_default(count);
    // Safety: ids and all columns for [0, count) are initialized above.
    unsafe { chunk.set_len(count) };

    loop {
        let loaded = read_i32(r)?;
        if loaded == -1 {
            break;
        }
        let type_index = types.resolve(loaded)?;
        let descriptor = registry.descriptor(type_index);
        if !descriptor.is_trivial() {
            return Err(LoadError::Corrupt("stream carries a non-trivial column"));
        }
        let bytes = read_vec(r, count * descriptor.size())?;
        match chunk.column_base(type_index) {
            Some((base, _)) => {
                // Safety: trivial values overwrite the defaults in place.
                unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), base, bytes.len()) };
            }
            None if descriptor.size() == 0 => {}
            None => return Err(LoadError::Corrupt("column type not in archetype")),
        }
    }

    loop {
        let loaded = read_i32(r)?;
        if loaded == -1 {
            break;
        }
        let type_index = types.resolve(loaded)?;
        let descriptor = registry.descriptor(type_index);
        let bytes = read_vec(r, descriptor.size())?;
        if chunk.shared_ptr(type_index).is_none() {
            return Err(LoadError::Corrupt("shared type not in archetype"));
        }
        // Safety: shared types are trivially copyable.
        unsafe { chunk.set_shared_bytes(type_index, bytes.as_ptr()) };
    }

    Ok(chunk)
}

// ---- world save / load -----------------------------------------------

impl World {
    /// Writes the whole world to a stream: registry preamble, every savable
    /// archetype's chunks, then the entity-location map and the next id.
    pub fn save<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let registry = self.registry();
        write_preamble(registry, w)?;

        let slots = self.archetype_slots();
        let mut skip: Vec<bool> = slots
            .iter()
            .map(|slot| match slot {
                Some(archetype) => archetype.types().contains(self.dont_save_type()),
                None => true,
            })
            .collect();

        let mut entity_map: Vec<(Entity, EntityLoc)> = Vec::new();
        let mut out_archetype = 0usize;

        for first in 0..slots.len() {
            if skip[first] {
                continue;
            }
            let archetype = slots[first].as_ref().unwrap();
            let savable = archetype.types().filter_savable(registry);
            if savable.is_empty() {
                continue;
            }

            // merge every later archetype whose savable set is identical
            // (they differ only in state components)
            let mut group: Vec<&Archetype> = vec![archetype];
            for candidate in first + 1..slots.len() {
                if skip[candidate] {
                    continue;
                }
                let other = slots[candidate].as_ref().unwrap();
                if other.types().filter_savable(registry) == savable {
                    skip[candidate] = true;
                    group.push(other);
                }
            }

            let mut out_chunk = 0usize;
            for member in &group {
                for (_, chunk) in member.chunks() {
                    if chunk.is_empty() {
                        continue;
                    }
                    for (element, id) in chunk.entities().iter().enumerate() {
                        entity_map.push((*id, EntityLoc::new(out_archetype, out_chunk, element)));
                    }
                    out_chunk += 1;
                }
            }
            if out_chunk == 0 {
                continue;
            }
            out_archetype += 1;

            write_type_set(w, &savable)?;
            write_u64(w, out_chunk as u64)?;
            for member in &group {
                for (_, chunk) in member.chunks() {
                    if chunk.is_empty() {
                        continue;
                    }
                    write_chunk(w, registry, chunk)?;
                }
            }
        }

        write_empty_type_set(w)?;

        write_u64(w, entity_map.len() as u64)?;
        for (id, loc) in &entity_map {
            write_i64(w, id.0)?;
            write_i32(w, loc.archetype as i32)?;
            write_i32(w, loc.chunk as i32)?;
            write_i32(w, loc.element as i32)?;
        }
        write_i64(w, self.next_entity_id())?;
        debug!(archetypes = out_archetype, entities = entity_map.len(), "saved world");
        Ok(())
    }

    /// Replaces this world's storage with the contents of a stream. The
    /// registry is untouched: loaded type indices are remapped by name.
    pub fn load<R: Read>(&mut self, r: &mut R) -> Result<(), LoadError> {
        self.reset_storage();
        let types = read_preamble(self.registry(), r)?;

        loop {
            let set = read_type_set(r, &types)?;
            if set.is_empty() {
                break;
            }
            let archetype_index = self.get_or_create_archetype(&set);
            let chunk_count = read_u64(r)?;
            let layout = self.archetype(archetype_index).unwrap().layout().clone();
            for _ in 0..chunk_count {
                let chunk = read_chunk(r, self.registry(), &layout, &types)?;
                self.archetype_mut(archetype_index).adopt_chunk(chunk);
            }
        }

        let entity_count = read_u64(r)?;
        for _ in 0..entity_count {
            let id = Entity(read_i64(r)?);
            let loc = EntityLoc {
                archetype: read_i32(r)? as u32,
                chunk: read_i32(r)? as u32,
                element: read_i32(r)? as u32,
            };
            self.insert_location(id, loc);
        }
        self.set_next_entity_id(read_i64(r)?);
        debug!(entities = entity_count, "loaded world");
        Ok(())
    }

    /// Writes one entity as a prefab stream. Returns `false` (writing
    /// nothing) when the id is unknown.
    pub fn save_prefab<W: Write>(&self, id: Entity, w: &mut W) -> io::Result<bool> {
        let Some(loc) = self.location(id) else {
            return Ok(false);
        };
        let registry = self.registry();
        write_preamble(registry, w)?;

        let archetype = self.archetype(loc.archetype as usize).unwrap();
        let savable = archetype.types().filter_savable(registry);
        write_type_set(w, &savable)?;

        let chunk = archetype.chunk(loc.chunk as usize).unwrap();
        let element = loc.element as usize;

        for column in chunk.layout().columns() {
            let descriptor = registry.descriptor(column.type_index);
            if !descriptor.is_savable() || !descriptor.is_trivial() {
                continue;
            }
            write_i32(w, column.type_index.0 as i32)?;
            let slot = chunk.component_slot(column.type_index, element).unwrap();
            let bytes = unsafe { std::slice::from_raw_parts(slot as *const u8, column.size) };
            w.write_all(bytes)?;
        }
        write_i32(w, -1)?;

        for slot in chunk.layout().shared_slots() {
            let descriptor = registry.descriptor(slot.type_index);
            if !descriptor.is_savable() || !descriptor.is_trivial() {
                continue;
            }
            write_i32(w, slot.type_index.0 as i32)?;
            let base = chunk.shared_ptr(slot.type_index).unwrap();
            let bytes = unsafe { std::slice::from_raw_parts(base as *const u8, slot.size) };
            w.write_all(bytes)?;
        }
        write_i32(w, -1)?;
        Ok(true)
    }

    /// Writes a prefab template to a stream. Types the template carries no
    /// value for are written with their default bytes.
    pub fn save_prefab_template<W: Write>(&self, prefab: &Prefab, w: &mut W) -> io::Result<()> {
        let registry = self.registry();
        write_preamble(registry, w)?;
        write_type_set(w, prefab.types())?;

        for kind in [ComponentKind::Regular, ComponentKind::Shared] {
            for index in prefab.types().iter() {
                let descriptor = registry.descriptor(index);
                if descriptor.kind() != kind || !descriptor.is_trivial() || descriptor.size() == 0 {
                    continue;
                }
                write_i32(w, index.0 as i32)?;
                match prefab.value_of(index) {
                    Some(bytes) => w.write_all(bytes)?,
                    None => {
                        let mut bytes = vec![0u8; descriptor.size()];
                        // Safety: constructing a trivial default into a
                        // correctly sized scratch buffer.
                        unsafe { descriptor.construct_default(bytes.as_mut_ptr()) };
                        w.write_all(&bytes)?;
                    }
                }
            }
            write_i32(w, -1)?;
        }
        Ok(())
    }

    /// Creates one entity from a prefab stream.
    pub fn create_from_prefab_stream<R: Read>(&mut self, r: &mut R) -> Result<Entity, LoadError> {
        let types = read_preamble(self.registry(), r)?;
        let set = read_type_set(r, &types)?;

        let mut values: Vec<(TypeIndex, Vec<u8>)> = Vec::new();
        loop {
            let loaded = read_i32(r)?;
            if loaded == -1 {
                break;
            }
            let type_index = types.resolve(loaded)?;
            let size = self.registry().descriptor(type_index).size();
            values.push((type_index, read_vec(r, size)?));
        }

        let mut shared: Vec<SharedValue> = Vec::new();
        loop {
            let loaded = read_i32(r)?;
            if loaded == -1 {
                break;
            }
            let type_index = types.resolve(loaded)?;
            let size = self.registry().descriptor(type_index).size();
            let bytes = read_vec(r, size)?;
            // Safety: shared types are trivially copyable values.
            shared.push(unsafe { SharedValue::from_raw(type_index, bytes.as_ptr(), size) });
        }

        let id = self.create_entity_raw(&set, &shared);
        let loc = self.location(id).unwrap();
        let chunk = self.chunk_mut_at(loc);
        for (type_index, bytes) in values {
            // Safety: only trivial values are ever written to streams.
            unsafe { chunk.write_component(type_index, loc.element as usize, bytes.as_ptr()) };
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut buffer = Vec::new();
        write_u64(&mut buffer, 42).unwrap();
        write_i32(&mut buffer, -1).unwrap();
        write_i64(&mut buffer, -7).unwrap();

        let mut cursor = io::Cursor::new(buffer);
        assert_eq!(read_u64(&mut cursor).unwrap(), 42);
        assert_eq!(read_i32(&mut cursor).unwrap(), -1);
        assert_eq!(read_i64(&mut cursor).unwrap(), -7);
    }

    #[test]
    fn preamble_remaps_by_name() {
        #[derive(Default)]
        struct Pos(f32);

        let mut writer = Registry::new();
        writer.register::<Pos>("Pos", ComponentKind::Regular).unwrap();

        let mut buffer = Vec::new();
        write_preamble(&writer, &mut buffer).unwrap();

        // a reader registry where Pos has a different index
        #[derive(Default)]
        struct Padding(u8);
        let mut reader = Registry::new();
        reader
            .register::<Padding>("Padding", ComponentKind::Regular)
            .unwrap();
        let pos = reader.register::<Pos>("Pos", ComponentKind::Regular).unwrap();

        let types = read_preamble(&reader, &mut io::Cursor::new(buffer)).unwrap();
        assert_eq!(types.resolve(2).unwrap(), pos);
        assert!(matches!(
            types.resolve(100),
            Err(LoadError::Corrupt(_))
        ));
    }
}
