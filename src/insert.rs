//! Inserting typed component tuples into chunk storage.
//!
//! An [`EntityBundle`] is a tuple of component values used to create an
//! entity. The tuple's types decide the archetype; values of shared-kind
//! types constrain which chunk the entity lands in, and the remaining
//! values initialize the entity's columns.

use crate::archetype::SharedValue;
use crate::chunk::Chunk;
use crate::registry::{Component, ComponentKind, Registry, TypeIndex};
use crate::typeset::TypeSet;
use smallvec::SmallVec;

/// A tuple of component values which can be inserted as one entity.
pub trait EntityBundle {
    /// The type-set of all components in the bundle, shared kinds included.
    fn type_set(&self, registry: &Registry) -> TypeSet;

    /// The shared-kind values of the bundle, used for chunk selection.
    fn shared_values(&self, registry: &Registry) -> SmallVec<[SharedValue; 2]>;

    /// Moves the non-shared values into the entity's column slots.
    fn write_components(self, registry: &Registry, chunk: &mut Chunk, element: usize);
}

fn lookup<T: Component>(registry: &Registry) -> TypeIndex {
    registry.lookup::<T>().unwrap_or_else(|| {
        panic!(
            "component type {} is not registered",
            std::any::type_name::<T>()
        )
    })
}

macro_rules! impl_entity_bundle {
    ($(($ty:ident, $idx:tt)),+; $arity:expr) => {
        impl<$($ty: Component),+> EntityBundle for ($($ty,)+) {
            fn type_set(&self, registry: &Registry) -> TypeSet {
                let mut types = TypeSet::new();
                $(types.insert(lookup::<$ty>(registry));)+
                debug_assert_eq!(types.len(), $arity, "bundle contains a duplicate component type");
                types
            }

            fn shared_values(&self, registry: &Registry) -> SmallVec<[SharedValue; 2]> {
                let mut shared = SmallVec::new();
                $(
                    let index = lookup::<$ty>(registry);
                    if registry.descriptor(index).kind() == ComponentKind::Shared {
                        // Safety: shared registration guarantees trivially
                        // copyable values.
                        shared.push(unsafe {
                            SharedValue::from_raw(
                                index,
                                &self.$idx as *const $ty as *const u8,
                                std::mem::size_of::<$ty>(),
                            )
                        });
                    }
                )+
                shared
            }

            fn write_components(self, registry: &Registry, chunk: &mut Chunk, element: usize) {
                $(
                    let index = lookup::<$ty>(registry);
                    if registry.descriptor(index).kind() != ComponentKind::Shared {
                        // Safety: the value is moved into the chunk; the
                        // trailing forget keeps it from dropping twice.
                        unsafe {
                            chunk.write_component(index, element, &self.$idx as *const $ty as *const u8)
                        };
                    }
                )+
                std::mem::forget(self);
            }
        }
    };
}

impl_entity_bundle!((A, 0); 1);
impl_entity_bundle!((A, 0), (B, 1); 2);
impl_entity_bundle!((A, 0), (B, 1), (C, 2); 3);
impl_entity_bundle!((A, 0), (B, 1), (C, 2), (D, 3); 4);
impl_entity_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4); 5);
impl_entity_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5); 6);
impl_entity_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6); 7);
impl_entity_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7); 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, Copy, Debug, PartialEq)]
    struct Pos(f32);
    #[derive(Default, Clone, Copy, PartialEq)]
    struct Team(u32);

    #[test]
    fn shared_kinds_are_split_out() {
        let mut registry = Registry::new();
        let pos = registry
            .register::<Pos>("Pos", ComponentKind::Regular)
            .unwrap();
        let team = registry.register_shared::<Team>("Team").unwrap();

        let bundle = (Pos(1.0), Team(3));
        let types = bundle.type_set(&registry);
        assert!(types.contains(pos) && types.contains(team));

        let shared = bundle.shared_values(&registry);
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].type_index(), team);
    }
}
