//! The shadow operand stack.
//!
//! Tracks, for every IL stack slot the generator has pushed and not yet
//! popped, whether it holds an owned reference (`Object`, needing a decref
//! on an error unwind) or a raw unboxed value (`Value`, popped without
//! ceremony). A label's first visit snapshots this; later visits restore
//! from the snapshot, which is sound only because the abstract interpreter
//! has already proven every incoming edge agrees on stack shape.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowKind {
    Object,
    Value,
}

#[derive(Debug, Clone, Default)]
pub struct ValueStack {
    slots: Vec<ShadowKind>,
}

impl ValueStack {
    pub fn new() -> ValueStack {
        ValueStack { slots: Vec::new() }
    }

    pub fn push(&mut self, kind: ShadowKind) {
        self.slots.push(kind);
    }

    pub fn pop(&mut self) -> Option<ShadowKind> {
        self.slots.pop()
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Every `Object` slot between `from_depth` (exclusive) and the current
    /// depth, deepest first — the order the CG's error-unwind decrefs them
    /// in.
    pub fn objects_above(&self, from_depth: usize) -> Vec<usize> {
        (from_depth..self.slots.len())
            .rev()
            .filter(|&i| self.slots[i] == ShadowKind::Object)
            .collect()
    }

    /// Every slot's kind strictly between `from_depth` and `to_depth`,
    /// top of stack first — the order an error unwind decrefs (`Object`)
    /// or discards (`Value`) them in. Empty whenever `to_depth <= from_depth`.
    pub fn kinds_between(&self, from_depth: usize, to_depth: usize) -> impl Iterator<Item = ShadowKind> + '_ {
        let to_depth = to_depth.min(self.slots.len());
        (from_depth..to_depth).rev().map(move |i| self.slots[i])
    }

    pub fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
    }
}

/// Per-offset snapshots, keyed by bytecode offset, for jump targets
/// the generator revisits.
#[derive(Debug, Default)]
pub struct StackSnapshots {
    snapshots: FxHashMap<usize, Vec<ShadowKind>>,
}

impl StackSnapshots {
    pub fn new() -> StackSnapshots {
        StackSnapshots { snapshots: FxHashMap::default() }
    }

    /// On first visit to `offset`, record `stack`'s current shape. Returns
    /// `true` if this was the first visit (the caller need not restore).
    pub fn snapshot_or_restore(&mut self, offset: usize, stack: &mut ValueStack) -> bool {
        match self.snapshots.get(&offset) {
            Some(saved) => {
                stack.slots = saved.clone();
                false
            }
            None => {
                self.snapshots.insert(offset, stack.slots.clone());
                true
            }
        }
    }
}
