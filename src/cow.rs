//! Copy-on-write containers.
//!
//! Per-program-point local maps are cloned constantly during fixpoint
//! iteration (every instruction clones its incoming state before mutating
//! it). A plain `Vec`/`HashSet` clone would make that quadratic in the
//! number of locals across a long function; these wrappers share the
//! backing storage via `Rc` and only actually clone it the first time two
//! owners diverge.

use std::rc::Rc;

use rustc_hash::FxHashSet;

/// A vector that clones its backing storage lazily, on first mutation
/// while shared.
#[derive(Debug, Clone)]
pub struct CowVec<T> {
    inner: Rc<Vec<T>>,
}

impl<T: Clone> CowVec<T> {
    pub fn new() -> CowVec<T> {
        CowVec { inner: Rc::new(Vec::new()) }
    }

    pub fn from_vec(v: Vec<T>) -> CowVec<T> {
        CowVec { inner: Rc::new(v) }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.inner.get(index)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.inner
    }

    /// Write to `index`, cloning the backing `Vec` first if another owner
    /// is still holding a reference to it.
    pub fn set(&mut self, index: usize, value: T) {
        Rc::make_mut(&mut self.inner)[index] = value;
    }

    /// True if no other `CowVec` shares this backing storage — mutating
    /// through `set` will not need to clone.
    pub fn is_uniquely_owned(&self) -> bool {
        Rc::strong_count(&self.inner) == 1
    }
}

impl<T: Clone> Default for CowVec<T> {
    fn default() -> Self {
        CowVec::new()
    }
}

impl<T: Clone + PartialEq> PartialEq for CowVec<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner) || *self.inner == *other.inner
    }
}

/// A hash set sharing the same clone-on-write discipline as `CowVec`,
/// used for `AbstractSources`-style membership sets.
#[derive(Debug, Clone)]
pub struct CowSet<T> {
    inner: Rc<FxHashSet<T>>,
}

impl<T: Clone + Eq + std::hash::Hash> CowSet<T> {
    pub fn new() -> CowSet<T> {
        CowSet { inner: Rc::new(FxHashSet::default()) }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.contains(value)
    }

    pub fn insert(&mut self, value: T) -> bool {
        Rc::make_mut(&mut self.inner).insert(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }

    /// Merge `other`'s members into `self`, cloning the backing set only
    /// if it is shared.
    pub fn union_in_place(&mut self, other: &CowSet<T>) {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        let target = Rc::make_mut(&mut self.inner);
        for item in other.inner.iter() {
            target.insert(item.clone());
        }
    }

    pub fn is_uniquely_owned(&self) -> bool {
        Rc::strong_count(&self.inner) == 1
    }
}

impl<T: Clone + Eq + std::hash::Hash> Default for CowSet<T> {
    fn default() -> Self {
        CowSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_storage_until_mutated() {
        let a = CowVec::from_vec(vec![1, 2, 3]);
        let b = a.clone();
        assert!(!a.is_uniquely_owned());

        let mut c = b;
        c.set(0, 99);
        assert_eq!(a.get(0), Some(&1));
        assert_eq!(c.get(0), Some(&99));
    }

    #[test]
    fn set_on_unique_owner_does_not_need_clone_semantics_to_differ() {
        let mut a: CowVec<i32> = CowVec::from_vec(vec![0, 0]);
        assert!(a.is_uniquely_owned());
        a.set(1, 5);
        assert_eq!(a.as_slice(), &[0, 5]);
    }

    #[test]
    fn set_union_merges_without_disturbing_shared_copy() {
        let mut a: CowSet<i32> = CowSet::new();
        a.insert(1);
        let b = a.clone();

        let mut c = a.clone();
        c.insert(2);
        assert!(!b.contains(&2));
        assert!(c.contains(&2));

        let mut merged = b.clone();
        merged.union_in_place(&c);
        assert!(merged.contains(&1));
        assert!(merged.contains(&2));
    }
}
