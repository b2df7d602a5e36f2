//! Prefabs: reusable templates of component values.
//!
//! A prefab records a type list plus the component bytes an instantiated
//! entity starts from. Types added without a value start from their
//! default. Prefabs round-trip through the same stream format as saved
//! entities (see [`serialize`](crate::serialize)).

use crate::archetype::SharedValue;
use crate::registry::{Component, ComponentKind, Registry, TypeIndex};
use crate::typeset::TypeSet;
use crate::world::World;
use crate::Entity;

/// A template of component values for a fixed type list.
#[derive(Default)]
pub struct Prefab {
    types: TypeSet,
    values: Vec<(TypeIndex, Box<[u8]>)>,
}

impl Prefab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `T` with an initial value. Prefab values are copied on every
    /// instantiation, so the type must be plain copyable data.
    pub fn set<T: Component + Copy>(mut self, registry: &Registry, value: T) -> Self {
        let index = registry.lookup::<T>().unwrap_or_else(|| {
            panic!(
                "component type {} is not registered",
                std::any::type_name::<T>()
            )
        });
        self.types.insert(index);
        let bytes = unsafe {
            std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>())
        };
        match self.values.iter_mut().find(|(i, _)| *i == index) {
            Some((_, slot)) => *slot = bytes.into(),
            None => self.values.push((index, bytes.into())),
        }
        self
    }

    /// Adds `T` to the type list without a value; instances get the
    /// type's default.
    pub fn with_type<T: Component>(mut self, registry: &Registry) -> Self {
        let index = registry.lookup::<T>().unwrap_or_else(|| {
            panic!(
                "component type {} is not registered",
                std::any::type_name::<T>()
            )
        });
        self.types.insert(index);
        self
    }

    pub fn types(&self) -> &TypeSet {
        &self.types
    }

    pub(crate) fn values(&self) -> &[(TypeIndex, Box<[u8]>)] {
        &self.values
    }

    /// The explicit value stored for `index`, if any.
    pub(crate) fn value_of(&self, index: TypeIndex) -> Option<&[u8]> {
        self.values
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, bytes)| bytes.as_ref())
    }

    fn shared_values(&self, registry: &Registry) -> Vec<SharedValue> {
        self.values
            .iter()
            .filter(|(index, _)| registry.descriptor(*index).kind() == ComponentKind::Shared)
            .map(|(index, bytes)| unsafe {
                SharedValue::from_raw(*index, bytes.as_ptr(), bytes.len())
            })
            .collect()
    }
}

impl World {
    /// Creates an entity from a prefab template.
    pub fn instantiate(&mut self, prefab: &Prefab) -> Entity {
        let shared = prefab.shared_values(self.registry());
        let id = self.create_entity_raw(prefab.types(), &shared);
        let loc = self.location(id).unwrap();

        let values: Vec<(TypeIndex, Box<[u8]>)> = prefab
            .values()
            .iter()
            .filter(|(index, _)| {
                self.registry().descriptor(*index).kind() != ComponentKind::Shared
            })
            .cloned()
            .collect();
        let chunk = self.chunk_mut_at(loc);
        for (index, bytes) in values {
            // Safety: prefab values are trivially copyable by construction.
            unsafe { chunk.write_component(index, loc.element as usize, bytes.as_ptr()) };
        }
        id
    }
}
