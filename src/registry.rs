//! Component type registration.
//!
//! Every component type a world can store is registered up front and
//! assigned a dense index. Indices are monotonic and never shift for the
//! life of the registry, which is what makes the [`TypeSet`](crate::TypeSet)
//! bitset and the on-disk remapping-by-name scheme work.

use fnv::FnvHashMap;
use std::any::TypeId;
use thiserror::Error;
use tracing::debug;

/// Types which may be attached to entities as components.
pub trait Component: Send + Sync + Sized + 'static {}
impl<T: Send + Sync + Sized + 'static> Component for T {}

/// The dense index of a component type within a [`Registry`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeIndex(pub u32);

impl TypeIndex {
    #[inline]
    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// How a component type behaves with respect to storage and persistence.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ComponentKind {
    /// Stored per entity, saved to streams.
    Regular,
    /// Stored per entity, skipped by save.
    DontSave,
    /// Stored once per chunk; all entities in a chunk share the value.
    Shared,
    /// Blocks real deletion: destroying the entity migrates it to a
    /// state-only archetype instead, so the host can reap it later.
    State,
    /// Reserved for the registry's own marker types.
    Internal,
}

/// Marker component attached to entities which must never be saved.
///
/// Archetypes containing this type are skipped wholly at save time.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DontSaveEntity;

/// Marker component for destroyed entities whose state components are kept.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeletedEntity;

/// Describes one registered component type.
///
/// Besides the layout facts (size, alignment, kind), a descriptor carries
/// the monomorphized operations the byte-level storage needs: default
/// construction, drop, and (for shared types) equality.
pub struct TypeDescriptor {
    index: TypeIndex,
    name: String,
    kind: ComponentKind,
    size: usize,
    align: usize,
    default_fn: unsafe fn(*mut u8),
    drop_fn: Option<unsafe fn(*mut u8)>,
    eq_fn: Option<unsafe fn(*const u8, *const u8) -> bool>,
}

impl TypeDescriptor {
    pub fn index(&self) -> TypeIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// Writes the type's default value into uninitialized storage.
    ///
    /// # Safety
    /// `slot` must be valid for `size` bytes and aligned to `align`.
    pub(crate) unsafe fn construct_default(&self, slot: *mut u8) {
        (self.default_fn)(slot)
    }

    pub(crate) fn default_fn(&self) -> unsafe fn(*mut u8) {
        self.default_fn
    }

    pub(crate) fn drop_fn(&self) -> Option<unsafe fn(*mut u8)> {
        self.drop_fn
    }

    pub(crate) fn eq_fn(&self) -> Option<unsafe fn(*const u8, *const u8) -> bool> {
        self.eq_fn
    }

    /// Whether values of this type are written by world and prefab saves.
    /// `Internal` types are saved as-is.
    pub fn is_savable(&self) -> bool {
        !matches!(self.kind, ComponentKind::DontSave | ComponentKind::State)
    }

    /// Whether the type can participate in streams at all. Types with drop
    /// glue are not memcpy-safe and are skipped by save.
    pub fn is_trivial(&self) -> bool {
        self.drop_fn.is_none()
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

/// Errors produced by component registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("component type name {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("rust type {0:?} is already registered as component {1:?}")]
    TypeAliased(&'static str, String),
    #[error("shared component {0:?} must be trivially copyable")]
    SharedNotTrivial(String),
}

/// Assigns every component type a dense, process-stable index.
///
/// `DontSaveEntity` and `DeletedEntity` are always pre-registered at
/// construction, so indices 0 and 1 are taken in every registry.
pub struct Registry {
    descriptors: Vec<TypeDescriptor>,
    by_name: FnvHashMap<String, TypeIndex>,
    by_type: FnvHashMap<TypeId, TypeIndex>,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Self {
            descriptors: Vec::new(),
            by_name: FnvHashMap::default(),
            by_type: FnvHashMap::default(),
        };
        registry
            .register::<DontSaveEntity>("DontSaveEntity", ComponentKind::Internal)
            .unwrap();
        registry
            .register::<DeletedEntity>("DeletedEntity", ComponentKind::Internal)
            .unwrap();
        registry
    }

    /// Registers `T` under `name` with the given kind.
    pub fn register<T: Component + Default>(
        &mut self,
        name: &str,
        kind: ComponentKind,
    ) -> Result<TypeIndex, RegistryError> {
        self.register_raw::<T>(name, kind, None)
    }

    /// Registers `T` as a shared component. Shared values are stored once
    /// per chunk and compared whenever a chunk is selected for an entity,
    /// so the type must be plain copyable data with an equality.
    pub fn register_shared<T: Component + Default + Copy + PartialEq>(
        &mut self,
        name: &str,
    ) -> Result<TypeIndex, RegistryError> {
        unsafe fn eq_erased<T: PartialEq>(a: *const u8, b: *const u8) -> bool {
            *(a as *const T) == *(b as *const T)
        }
        self.register_raw::<T>(name, ComponentKind::Shared, Some(eq_erased::<T>))
    }

    fn register_raw<T: Component + Default>(
        &mut self,
        name: &str,
        kind: ComponentKind,
        eq_fn: Option<unsafe fn(*const u8, *const u8) -> bool>,
    ) -> Result<TypeIndex, RegistryError> {
        if self.by_name.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_owned()));
        }
        if let Some(existing) = self.by_type.get(&TypeId::of::<T>()) {
            let existing = self.descriptors[existing.as_usize()].name.clone();
            return Err(RegistryError::TypeAliased(std::any::type_name::<T>(), existing));
        }

        // shared singletons are compared and copied bytewise when a chunk
        // is selected, so drop glue is unsupported for them
        if kind == ComponentKind::Shared && std::mem::needs_drop::<T>() {
            return Err(RegistryError::SharedNotTrivial(name.to_owned()));
        }

        unsafe fn construct_erased<T: Default>(slot: *mut u8) {
            std::ptr::write(slot as *mut T, T::default())
        }
        unsafe fn drop_erased<T>(slot: *mut u8) {
            std::ptr::drop_in_place(slot as *mut T)
        }

        let index = TypeIndex(self.descriptors.len() as u32);
        self.descriptors.push(TypeDescriptor {
            index,
            name: name.to_owned(),
            kind,
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            default_fn: construct_erased::<T>,
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(drop_erased::<T>)
            } else {
                None
            },
            eq_fn,
        });
        self.by_name.insert(name.to_owned(), index);
        self.by_type.insert(TypeId::of::<T>(), index);

        debug!(name, ?index, ?kind, "registered component type");
        Ok(index)
    }

    /// Looks a type index up by registered name.
    pub fn lookup_by_name(&self, name: &str) -> Option<TypeIndex> {
        self.by_name.get(name).copied()
    }

    /// Looks a type index up by Rust type.
    pub fn lookup<T: Component>(&self) -> Option<TypeIndex> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub(crate) fn lookup_type_id(&self, id: TypeId) -> Option<TypeIndex> {
        self.by_type.get(&id).copied()
    }

    /// Returns the descriptor for a registered index.
    pub fn descriptor(&self, index: TypeIndex) -> &TypeDescriptor {
        &self.descriptors[index.as_usize()]
    }

    /// The number of registered types.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.descriptors.iter()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
