use std::collections::HashMap;

use super::Pos;
use super::ir::OpNode;
use crate::runtime::component::InstanceHandle;
use crate::runtime::error::{EvalError, EvalResult};

/// What a name is bound to at runtime.
#[derive(Debug, Clone)]
pub enum Binding {
    /// Symbolic operator-tree node (call-by-name).
    Node(OpNode),
    /// Component instance.
    Instance(InstanceHandle),
}

impl Binding {
    /// Bind a node, unwrapping instance references into instance bindings.
    pub fn from_node(node: OpNode) -> Self {
        match node {
            OpNode::InstanceRef(instance) => Binding::Instance(instance),
            other => Binding::Node(other),
        }
    }
}

/// A future registered by `go`.
#[derive(Debug, Clone)]
pub struct Future {
    /// Body node, collapsed at `wait`.
    pub node: OpNode,
    /// Whether a `wait` has joined it.
    pub awaited: bool,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: HashMap<String, Binding>,
    futures: HashMap<String, Future>,
}

/// Stack of lexical scopes.
#[derive(Debug, Clone)]
pub struct Frame {
    scopes: Vec<Scope>,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// Frame with one empty scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    /// Enter a nested scope.
    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Leave the innermost scope. The outermost scope is never popped.
    pub fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Nesting depth.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    fn innermost(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Bind `name` in the innermost scope, replacing any same-scope binding.
    pub fn define(&mut self, name: impl Into<String>, binding: Binding) {
        self.innermost().bindings.insert(name.into(), binding);
    }

    /// Bind `name`, rejecting a second definition in the same scope.
    pub fn define_unique(&mut self, name: &str, binding: Binding, pos: Pos) -> EvalResult<()> {
        let scope = self.innermost();
        if scope.bindings.contains_key(name) {
            return Err(EvalError::instantiation(
                pos,
                name,
                "already defined in this scope",
            ));
        }
        scope.bindings.insert(name.to_string(), binding);
        Ok(())
    }

    /// Resolve `name`, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.bindings.get(name))
    }

    /// Rebind an existing name in the scope that defines it.
    pub fn assign(&mut self, name: &str, binding: Binding) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.bindings.get_mut(name) {
                *slot = binding;
                return true;
            }
        }
        false
    }

    /// Register a future in the innermost scope.
    pub fn go(&mut self, name: impl Into<String>, node: OpNode) {
        self.innermost().futures.insert(
            name.into(),
            Future {
                node,
                awaited: false,
            },
        );
    }

    /// Resolve a future, innermost scope first.
    pub fn future(&self, name: &str) -> Option<&Future> {
        self.scopes.iter().rev().find_map(|s| s.futures.get(name))
    }

    /// Mark a future as joined. Returns `false` if no such future exists.
    pub fn await_future(&mut self, name: &str) -> bool {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(future) = scope.futures.get_mut(name) {
                future.awaited = true;
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scopes_shadow_and_pop() {
        let mut frame = Frame::new();
        frame.define("x", Binding::Node(OpNode::constant(1i64)));
        frame.push();
        frame.define("x", Binding::Node(OpNode::constant(2i64)));
        assert!(matches!(frame.lookup("x"), Some(Binding::Node(n)) if n.to_string() == "2"));
        frame.pop();
        assert!(matches!(frame.lookup("x"), Some(Binding::Node(n)) if n.to_string() == "1"));
    }

    #[test]
    fn assign_rebinds_in_defining_scope() {
        let mut frame = Frame::new();
        frame.define("x", Binding::Node(OpNode::constant(1i64)));
        frame.push();
        assert!(frame.assign("x", Binding::Node(OpNode::constant(5i64))));
        frame.pop();
        assert!(matches!(frame.lookup("x"), Some(Binding::Node(n)) if n.to_string() == "5"));
        assert!(!frame.assign("y", Binding::Node(OpNode::Nil)));
    }

    #[test]
    fn define_unique_rejects_same_scope_redefinition() {
        let mut frame = Frame::new();
        frame.define_unique("a", Binding::Node(OpNode::Nil), Pos::new(1, 1)).unwrap();
        let err = frame
            .define_unique("a", Binding::Node(OpNode::Nil), Pos::new(2, 1))
            .unwrap_err();
        assert_eq!(err.kind(), "instantiation");
        frame.push();
        assert!(frame.define_unique("a", Binding::Node(OpNode::Nil), Pos::new(3, 1)).is_ok());
    }

    #[test]
    fn futures_track_awaited_state() {
        let mut frame = Frame::new();
        frame.go("f", OpNode::constant(true));
        assert!(!frame.future("f").unwrap().awaited);
        assert!(frame.await_future("f"));
        assert!(frame.future("f").unwrap().awaited);
        assert!(!frame.await_future("g"));
    }
}
