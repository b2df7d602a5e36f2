//! Compact sets of component types.
//!
//! A [`TypeSet`] is a bitset over the registry's dense type indices. Two
//! sets are equal exactly when they contain the same indices, regardless of
//! how much capacity either has allocated, which makes set equality the
//! identity test for archetypes.

use crate::registry::{ComponentKind, Registry, TypeIndex};
use bit_set::BitSet;
use bit_vec::BitVec;

/// A set of component type indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeSet {
    bits: BitSet,
}

impl TypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: TypeIndex) {
        self.bits.insert(index.as_usize());
    }

    pub fn remove(&mut self, index: TypeIndex) {
        self.bits.remove(index.as_usize());
    }

    pub fn contains(&self, index: TypeIndex) -> bool {
        self.bits.contains(index.as_usize())
    }

    /// Adds every index in `other` to this set.
    pub fn union_with(&mut self, other: &TypeSet) {
        self.bits.union_with(&other.bits);
    }

    /// Removes every index in `other` from this set.
    pub fn subtract(&mut self, other: &TypeSet) {
        self.bits.difference_with(&other.bits);
    }

    pub fn is_subset(&self, other: &TypeSet) -> bool {
        self.bits.is_subset(&other.bits)
    }

    pub fn is_disjoint(&self, other: &TypeSet) -> bool {
        self.bits.is_disjoint(&other.bits)
    }

    /// The number of types in the set.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeIndex> + '_ {
        self.bits.iter().map(|i| TypeIndex(i as u32))
    }

    /// Returns the subset of this set whose types have kind `State`.
    pub fn filter_state(&self, registry: &Registry) -> TypeSet {
        self.filter_by_kind(registry, |kind| kind == ComponentKind::State)
    }

    /// Returns the subset of this set which world saves write: everything
    /// except `DontSave` and `State` types.
    pub fn filter_savable(&self, registry: &Registry) -> TypeSet {
        let mut out = TypeSet::new();
        for descriptor in registry.iter() {
            if self.contains(descriptor.index()) && descriptor.is_savable() {
                out.insert(descriptor.index());
            }
        }
        out
    }

    fn filter_by_kind(&self, registry: &Registry, keep: impl Fn(ComponentKind) -> bool) -> TypeSet {
        let mut out = TypeSet::new();
        for descriptor in registry.iter() {
            if self.contains(descriptor.index()) && keep(descriptor.kind()) {
                out.insert(descriptor.index());
            }
        }
        out
    }

    /// The set's raw bit pattern, packed most-significant-bit first per
    /// byte. This is the §6 wire representation.
    pub(crate) fn wire_bytes(&self) -> Vec<u8> {
        self.bits.get_ref().to_bytes()
    }

    /// Reconstructs a set from its wire representation. Indices refer to
    /// whichever registry wrote the bytes; remap before use.
    pub(crate) fn from_wire_bytes(bytes: &[u8]) -> Self {
        Self {
            bits: BitSet::from_bit_vec(BitVec::from_bytes(bytes)),
        }
    }
}

impl FromIterator<TypeIndex> for TypeSet {
    fn from_iter<I: IntoIterator<Item = TypeIndex>>(iter: I) -> Self {
        let mut set = TypeSet::new();
        for index in iter {
            set.insert(index);
        }
        set
    }
}

/// A matching predicate over type-sets, plus the access facets the
/// scheduler locks on.
///
/// `required`/`excluded` decide which archetypes match; `reads`/`writes`
/// overlay which of the matched components the holder intends to access,
/// and how.
#[derive(Clone, Debug, Default)]
pub struct TypeQuery {
    pub required: TypeSet,
    pub excluded: TypeSet,
    pub reads: TypeSet,
    pub writes: TypeSet,
}

impl TypeQuery {
    /// `true` when `candidate` contains every required type and none of the
    /// excluded ones.
    pub fn matches(&self, candidate: &TypeSet) -> bool {
        self.required.is_subset(candidate) && self.excluded.is_disjoint(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentKind;

    fn set(indices: &[u32]) -> TypeSet {
        indices.iter().map(|&i| TypeIndex(i)).collect()
    }

    #[test]
    fn equality_ignores_capacity() {
        let mut a = set(&[1, 3]);
        let b = set(&[1, 3]);
        // force a to grow its backing storage past b's
        a.insert(TypeIndex(200));
        a.remove(TypeIndex(200));
        assert_eq!(a, b);
    }

    #[test]
    fn union_and_subtract() {
        let mut a = set(&[0, 2]);
        a.union_with(&set(&[2, 5]));
        assert_eq!(a, set(&[0, 2, 5]));
        a.subtract(&set(&[0]));
        assert_eq!(a, set(&[2, 5]));
    }

    #[test]
    fn query_matching() {
        let query = TypeQuery {
            required: set(&[1, 2]),
            excluded: set(&[4]),
            ..TypeQuery::default()
        };
        assert!(query.matches(&set(&[1, 2, 3])));
        assert!(!query.matches(&set(&[1, 3])));
        assert!(!query.matches(&set(&[1, 2, 4])));
    }

    #[test]
    fn wire_round_trip() {
        let original = set(&[0, 9, 31]);
        let bytes = original.wire_bytes();
        assert_eq!(TypeSet::from_wire_bytes(&bytes), original);
    }

    #[test]
    fn state_filter() {
        let mut registry = Registry::new();
        #[derive(Default)]
        struct Health(f32);
        #[derive(Default)]
        struct Corpse(u8);
        let health = registry
            .register::<Health>("Health", ComponentKind::Regular)
            .unwrap();
        let corpse = registry
            .register::<Corpse>("Corpse", ComponentKind::State)
            .unwrap();

        let both: TypeSet = [health, corpse].into_iter().collect();
        let state = both.filter_state(&registry);
        assert!(state.contains(corpse));
        assert!(!state.contains(health));
    }
}
