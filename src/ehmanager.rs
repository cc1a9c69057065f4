//! Exception-handler manager.
//!
//! Tracks, in creation order, every `SETUP_FINALLY` region the code
//! generator has opened. Grounded on Pyjion's `ExceptionHandlerManager` /
//! `ExceptionHandler`, restated as a plain vector with back-pointer
//! indices rather than a manually `delete`d linked list of heap nodes.

use rustc_hash::FxHashMap;

use crate::ir::LocalId;

/// The six locals one exception region needs to save and restore the
/// thread state's exception triple across its body.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionVars {
    pub prev_exc: LocalId,
    pub prev_exc_val: LocalId,
    pub prev_traceback: LocalId,
    pub finally_exc: LocalId,
    pub finally_traceback: LocalId,
    pub finally_value: LocalId,
}

/// One `SETUP_FINALLY` region. `back_handler` is the index, in the owning
/// manager's vector, of the lexically enclosing handler — `None` only for
/// the root.
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    pub error_target: crate::ir::LabelId,
    /// Operand-stack depth at the point the region began, so the CG's
    /// error path knows how far to unwind.
    pub entry_stack_depth: usize,
    pub vars: ExceptionVars,
    pub back_handler: Option<usize>,
    pub is_try_finally: bool,
}

impl ExceptionHandler {
    pub fn is_root(&self) -> bool {
        self.back_handler.is_none()
    }
}

/// Ordered handler records plus an offset index, so the CG can find the
/// handler whose target is a given bytecode offset while re-walking it.
#[derive(Debug, Default)]
pub struct ExceptionHandlerManager {
    handlers: Vec<ExceptionHandler>,
    handler_at_target: FxHashMap<usize, usize>,
}

impl ExceptionHandlerManager {
    pub fn new() -> ExceptionHandlerManager {
        ExceptionHandlerManager { handlers: Vec::new(), handler_at_target: FxHashMap::default() }
    }

    /// Install the root handler (index 0). Its `ErrorTarget` is the
    /// generated "pop frame, return NULL" path, reached when an exception
    /// escapes every other handler.
    pub fn set_root_handler(&mut self, error_target: crate::ir::LabelId, vars: ExceptionVars) -> usize {
        debug_assert!(self.handlers.is_empty(), "root handler must be installed first");
        self.handlers.push(ExceptionHandler {
            error_target,
            entry_stack_depth: 0,
            vars,
            back_handler: None,
            is_try_finally: false,
        });
        0
    }

    pub fn root_handler(&self) -> &ExceptionHandler {
        &self.handlers[0]
    }

    /// Register a new `SETUP_FINALLY` region and return its index.
    pub fn add_setup_finally(
        &mut self,
        error_target: crate::ir::LabelId,
        entry_stack_depth: usize,
        parent: usize,
        vars: ExceptionVars,
        target_offset: usize,
        is_try_finally: bool,
    ) -> usize {
        let index = self.handlers.len();
        self.handlers.push(ExceptionHandler {
            error_target,
            entry_stack_depth,
            vars,
            back_handler: Some(parent),
            is_try_finally,
        });
        self.handler_at_target.insert(target_offset, index);
        index
    }

    pub fn handler(&self, index: usize) -> &ExceptionHandler {
        &self.handlers[index]
    }

    pub fn is_handler_at_offset(&self, offset: usize) -> bool {
        self.handler_at_target.contains_key(&offset)
    }

    pub fn handler_at_offset(&self, offset: usize) -> Option<&ExceptionHandler> {
        self.handler_at_target.get(&offset).map(|&i| &self.handlers[i])
    }

    /// All handlers in creation order — the order the error-dispatch
    /// epilogue marks their labels in.
    pub fn handlers_in_creation_order(&self) -> impl Iterator<Item = (usize, &ExceptionHandler)> {
        self.handlers.iter().enumerate()
    }

    /// Walk from `index` up through `back_handler` links to the root,
    /// inclusive of both ends.
    pub fn unwind_to_root(&self, index: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            path.push(i);
            current = self.handlers[i].back_handler;
        }
        path
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::LabelId;

    fn dummy_vars() -> ExceptionVars {
        ExceptionVars {
            prev_exc: LocalId(0),
            prev_exc_val: LocalId(1),
            prev_traceback: LocalId(2),
            finally_exc: LocalId(3),
            finally_traceback: LocalId(4),
            finally_value: LocalId(5),
        }
    }

    #[test]
    fn root_handler_has_no_back_pointer() {
        let mut mgr = ExceptionHandlerManager::new();
        mgr.set_root_handler(LabelId(0), dummy_vars());
        assert!(mgr.root_handler().is_root());
    }

    #[test]
    fn nested_handler_resolves_at_its_target_offset() {
        let mut mgr = ExceptionHandlerManager::new();
        mgr.set_root_handler(LabelId(0), dummy_vars());
        let child = mgr.add_setup_finally(LabelId(1), 2, 0, dummy_vars(), 40, false);
        assert!(mgr.is_handler_at_offset(40));
        assert_eq!(mgr.handler_at_offset(40).unwrap().entry_stack_depth, 2);
        assert!(!mgr.handler(child).is_root());
    }

    #[test]
    fn unwind_to_root_walks_the_full_chain() {
        let mut mgr = ExceptionHandlerManager::new();
        mgr.set_root_handler(LabelId(0), dummy_vars());
        let mid = mgr.add_setup_finally(LabelId(1), 0, 0, dummy_vars(), 10, false);
        let inner = mgr.add_setup_finally(LabelId(2), 0, mid, dummy_vars(), 20, false);
        assert_eq!(mgr.unwind_to_root(inner), vec![inner, mid, 0]);
    }
}
