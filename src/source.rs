//! Source / escape analysis.
//!
//! A `Source` answers one question for the code generator: must this
//! value be materialized as a boxed host object, or can it stay unboxed?
//! Modeled as an arena of nodes addressed by index with a disjoint-set
//! union for `combine`, per Design Notes ¶2 — the escaped flag lives on
//! the DSU root rather than being propagated eagerly to every member.

/// Index into a `SourceArena`.
pub type SourceId = usize;

/// How a source's value came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Loaded from the constant pool.
    Const,
    /// Read from a local slot.
    Local,
    /// Produced by an operator; inputs are unioned in via `combine`.
    Intermediate,
}

impl SourceKind {
    /// Human-readable tag for diagnostics (not load-bearing), mirroring
    /// Pyjion's `AbstractSource::describe()`.
    pub fn kind_name(self) -> &'static str {
        match self {
            SourceKind::Const => "const",
            SourceKind::Local => "local",
            SourceKind::Intermediate => "intermediate",
        }
    }
}

struct SourceNode {
    kind: SourceKind,
    parent: SourceId,
    rank: u32,
    /// Meaningful only when this node is its own group's root.
    escaped: bool,
}

/// Owns every source allocated during one compilation.
#[derive(Default)]
pub struct SourceArena {
    nodes: Vec<SourceNode>,
}

impl SourceArena {
    pub fn new() -> SourceArena {
        SourceArena { nodes: Vec::new() }
    }

    fn push(&mut self, kind: SourceKind) -> SourceId {
        let id = self.nodes.len();
        self.nodes.push(SourceNode {
            kind,
            parent: id,
            rank: 0,
            escaped: false,
        });
        id
    }

    pub fn new_const(&mut self) -> SourceId {
        self.push(SourceKind::Const)
    }

    pub fn new_local(&mut self) -> SourceId {
        self.push(SourceKind::Local)
    }

    /// Allocate an `Intermediate` source and union it with every input
    /// source's group.
    pub fn new_intermediate(&mut self, inputs: &[SourceId]) -> SourceId {
        let id = self.push(SourceKind::Intermediate);
        for &input in inputs {
            self.combine(id, input);
        }
        id
    }

    fn find(&mut self, id: SourceId) -> SourceId {
        let parent = self.nodes[id].parent;
        if parent == id {
            return id;
        }
        let root = self.find(parent);
        self.nodes[id].parent = root;
        root
    }

    /// Union the groups containing `a` and `b`. If either was already
    /// escaped, the merged group is escaped too.
    /// Returns the id of the surviving root.
    pub fn combine(&mut self, a: SourceId, b: SourceId) -> SourceId {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }

        let escaped = self.nodes[ra].escaped || self.nodes[rb].escaped;
        let (new_root, absorbed) = if self.nodes[ra].rank < self.nodes[rb].rank {
            (rb, ra)
        } else if self.nodes[ra].rank > self.nodes[rb].rank {
            (ra, rb)
        } else {
            self.nodes[ra].rank += 1;
            (ra, rb)
        };
        self.nodes[absorbed].parent = new_root;
        self.nodes[new_root].escaped = escaped;
        new_root
    }

    /// Mark `id`'s source group as escaped; propagates to every current
    /// and future member via the DSU root.
    pub fn escape(&mut self, id: SourceId) {
        let root = self.find(id);
        self.nodes[root].escaped = true;
    }

    /// Whether `id`'s source group is escaped.
    pub fn escapes(&mut self, id: SourceId) -> bool {
        let root = self.find(id);
        self.nodes[root].escaped
    }

    /// Same question the code generator actually asks; kept distinct from
    /// `escapes` because the two diverge if boxing is ever decoupled from
    /// escape in the future (it is not, today).
    pub fn needs_boxing(&mut self, id: SourceId) -> bool {
        self.escapes(id)
    }

    pub fn kind_name(&self, id: SourceId) -> &'static str {
        self.nodes[id].kind.kind_name()
    }
}

/// A value's source may be absent (e.g. a value produced with no
/// provenance the AI tracks). An absent source is equivalent to "already
/// escaped" — combining with one forces the other to escape.
pub type MaybeSource = Option<SourceId>;

/// Force escape on an optional source; a no-op on `None` since a missing
/// source is already treated as escaped.
pub fn escape_opt(arena: &mut SourceArena, source: MaybeSource) {
    if let Some(id) = source {
        arena.escape(id);
    }
}

/// Combine two optional sources the way a binary operator's operands are
/// combined into its result's `Intermediate` source. If either is absent,
/// the other is forced to escape and the result has no source either
/// (there is nothing sound to attach further provenance to).
pub fn combine_opt(arena: &mut SourceArena, a: MaybeSource, b: MaybeSource) -> MaybeSource {
    match (a, b) {
        (Some(a), Some(b)) => Some(arena.new_intermediate(&[a, b])),
        (Some(a), None) => {
            arena.escape(a);
            None
        }
        (None, Some(b)) => {
            arena.escape(b);
            None
        }
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_source_is_not_escaped() {
        let mut arena = SourceArena::new();
        let s = arena.new_local();
        assert!(!arena.escapes(s));
    }

    #[test]
    fn escape_is_visible_through_find() {
        let mut arena = SourceArena::new();
        let s = arena.new_const();
        arena.escape(s);
        assert!(arena.escapes(s));
        assert!(arena.needs_boxing(s));
    }

    #[test]
    fn combine_merges_groups() {
        let mut arena = SourceArena::new();
        let a = arena.new_local();
        let b = arena.new_const();
        let root = arena.combine(a, b);
        assert!(!arena.escapes(root));
        arena.escape(a);
        // escaping one member of the merged group escapes the whole group.
        assert!(arena.escapes(b));
    }

    #[test]
    fn escape_before_combine_propagates() {
        let mut arena = SourceArena::new();
        let a = arena.new_local();
        arena.escape(a);
        let b = arena.new_const();
        let root = arena.combine(a, b);
        assert!(arena.escapes(root));
        assert!(arena.escapes(b));
    }

    #[test]
    fn new_intermediate_unions_all_inputs() {
        let mut arena = SourceArena::new();
        let a = arena.new_local();
        let b = arena.new_const();
        let c = arena.new_local();
        arena.escape(c);
        let result = arena.new_intermediate(&[a, b, c]);
        assert!(arena.escapes(result));
        assert!(arena.escapes(a));
        assert!(arena.escapes(b));
    }

    #[test]
    fn escape_opt_none_is_noop() {
        let mut arena = SourceArena::new();
        escape_opt(&mut arena, None);
    }

    #[test]
    fn combine_opt_missing_source_escapes_the_other() {
        let mut arena = SourceArena::new();
        let a = arena.new_local();
        let result = combine_opt(&mut arena, Some(a), None);
        assert!(result.is_none());
        assert!(arena.escapes(a));
    }

    #[test]
    fn combine_opt_both_present_yields_intermediate() {
        let mut arena = SourceArena::new();
        let a = arena.new_local();
        let b = arena.new_const();
        let result = combine_opt(&mut arena, Some(a), Some(b));
        assert!(result.is_some());
        assert_eq!(arena.kind_name(result.unwrap()), "intermediate");
    }
}
