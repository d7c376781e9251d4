//! Component instances
//!
//! The evaluator talks to every instance through [`ComponentInstance`] and
//! never learns whether a method is written in SDL or provided natively: both
//! return an operator-tree node from `invoke_method`.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::error::{EvalError, EvalResult};
use super::native::NativeComponent;
use crate::interpreter::ast::ComponentDecl;
use crate::interpreter::frame::{Binding, Frame};
use crate::interpreter::ir::OpNode;
use crate::interpreter::scope::FileEnv;
use crate::interpreter::{Lowerer, Pos, Vm};

/// Shared handle to a live instance.
pub type InstanceHandle = Arc<dyn ComponentInstance>;

/// Uniform contract over native and user-defined instances.
pub trait ComponentInstance: Send + Sync + fmt::Debug {
    /// Name given by the `instance` declaration.
    fn instance_name(&self) -> &str;

    /// Component type name.
    fn type_name(&self) -> &str;

    /// Whether methods are provided by a native implementation.
    fn is_native(&self) -> bool;

    /// Stored node of a parameter.
    fn get_param(&self, name: &str) -> Option<OpNode>;

    /// Replace a parameter.
    fn set_param(&self, name: &str, node: OpNode, vm: &Vm) -> EvalResult<()>;

    /// Injected dependency.
    fn get_dependency(&self, name: &str) -> Option<InstanceHandle>;

    /// Inject a dependency; the instance must have the declared type.
    fn set_dependency(&self, name: &str, instance: InstanceHandle) -> EvalResult<()>;

    /// Number of positional arguments `method` takes, if it exists.
    fn method_arity(&self, method: &str) -> Option<usize>;

    /// Invoke `method` with symbolic arguments, yielding the call's node.
    fn invoke_method(self: Arc<Self>, method: &str, args: &[OpNode], vm: &Vm) -> EvalResult<OpNode>;
}

fn check_arity(instance: &dyn ComponentInstance, method: &str, given: usize) -> EvalResult<()> {
    let subject = format!("{}.{}", instance.instance_name(), method);
    match instance.method_arity(method) {
        None => Err(EvalError::method(
            Pos::default(),
            subject,
            format!("no method '{}' on {}", method, instance.type_name()),
        )),
        Some(expected) if expected != given => Err(EvalError::type_error(
            Pos::default(),
            subject,
            format!("expected {expected} argument(s), got {given}"),
        )),
        Some(_) => Ok(()),
    }
}

/// Instance of a component whose methods are written in SDL.
pub struct UserDefinedInstance {
    name: String,
    decl: Arc<ComponentDecl>,
    env: Arc<FileEnv>,
    params: RwLock<HashMap<String, OpNode>>,
    overridden: RwLock<HashSet<String>>,
    deps: RwLock<HashMap<String, InstanceHandle>>,
}

impl UserDefinedInstance {
    /// Empty instance; parameters and dependencies are filled during
    /// instantiation.
    pub fn new(name: impl Into<String>, decl: Arc<ComponentDecl>, env: Arc<FileEnv>) -> Self {
        Self {
            name: name.into(),
            decl,
            env,
            params: RwLock::new(HashMap::new()),
            overridden: RwLock::new(HashSet::new()),
            deps: RwLock::new(HashMap::new()),
        }
    }

    /// Declaration this instance was created from.
    pub fn decl(&self) -> &Arc<ComponentDecl> {
        &self.decl
    }

    /// File the declaration lives in.
    pub fn env(&self) -> &Arc<FileEnv> {
        &self.env
    }

    /// Pin a parameter to `node`; defaults never replace it.
    pub fn override_param(&self, name: &str, node: OpNode) {
        self.params.write().insert(name.to_string(), node);
        self.overridden.write().insert(name.to_string());
    }

    /// Lower the default of every parameter without an override, in
    /// declaration order. Each default sees the parameters declared before
    /// it, so defaults such as `Slow = FailureProb * 2` follow later
    /// overrides of the parameters they read.
    pub fn derive_defaults(&self, vm: &Vm, pos: Pos) -> EvalResult<()> {
        let overridden = self.overridden.read().clone();
        let mut derived = HashMap::new();
        let mut defaults = Lowerer::new(vm, self.env.clone());
        for param in &self.decl.params {
            let pinned = if overridden.contains(&param.name) {
                self.params.read().get(&param.name).cloned()
            } else {
                None
            };
            let node = match pinned {
                Some(node) => node,
                None => {
                    let Some(default) = &param.default else {
                        return Err(EvalError::instantiation(
                            pos,
                            format!("{}.{}", self.name, param.name),
                            "missing required parameter",
                        ));
                    };
                    let node = defaults.lower_expr(default)?;
                    derived.insert(param.name.clone(), node.clone());
                    node
                }
            };
            defaults.frame_mut().define(param.name.clone(), Binding::from_node(node));
        }
        self.params.write().extend(derived);
        Ok(())
    }

    /// Frame with parameters, dependencies and `self` bound.
    fn method_frame(self: &Arc<Self>) -> Frame {
        let mut frame = Frame::new();
        for (name, node) in self.params.read().iter() {
            frame.define(name.clone(), Binding::Node(node.clone()));
        }
        for (name, instance) in self.deps.read().iter() {
            frame.define(name.clone(), Binding::Instance(instance.clone()));
        }
        let this: InstanceHandle = self.clone();
        frame.define("self", Binding::Instance(this));
        frame
    }
}

impl fmt::Debug for UserDefinedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDefinedInstance")
            .field("name", &self.name)
            .field("type", &self.decl.name)
            .field("params", &self.params.read().keys().collect::<Vec<_>>())
            .field("deps", &self.deps.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ComponentInstance for UserDefinedInstance {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        &self.decl.name
    }

    fn is_native(&self) -> bool {
        false
    }

    fn get_param(&self, name: &str) -> Option<OpNode> {
        self.params.read().get(name).cloned()
    }

    fn set_param(&self, name: &str, node: OpNode, vm: &Vm) -> EvalResult<()> {
        if self.decl.param(name).is_none() {
            return Err(EvalError::resolution(
                Pos::default(),
                format!("{}.{}", self.name, name),
                format!("{} has no parameter '{}'", self.decl.name, name),
            ));
        }
        self.override_param(name, node);
        self.derive_defaults(vm, Pos::default())
    }

    fn get_dependency(&self, name: &str) -> Option<InstanceHandle> {
        self.deps.read().get(name).cloned()
    }

    fn set_dependency(&self, name: &str, instance: InstanceHandle) -> EvalResult<()> {
        let subject = format!("{}.{}", self.name, name);
        let uses = self.decl.dependency(name).ok_or_else(|| {
            EvalError::resolution(
                Pos::default(),
                subject.clone(),
                format!("{} has no dependency '{}'", self.decl.name, name),
            )
        })?;
        let expected = self
            .env
            .component(&uses.component)
            .map(|(decl, _)| decl.name.clone())
            .unwrap_or_else(|| uses.component.clone());
        if instance.type_name() != expected {
            return Err(EvalError::type_error(
                uses.pos,
                subject,
                format!("expected a {} instance, got {}", expected, instance.type_name()),
            ));
        }
        self.deps.write().insert(name.to_string(), instance);
        Ok(())
    }

    fn method_arity(&self, method: &str) -> Option<usize> {
        self.decl.method(method).map(|m| m.params.len())
    }

    fn invoke_method(self: Arc<Self>, method: &str, args: &[OpNode], vm: &Vm) -> EvalResult<OpNode> {
        check_arity(self.as_ref(), method, args.len())?;
        let decl = self.decl.clone();
        let Some(method_decl) = decl.method(method) else {
            return Err(EvalError::method(Pos::default(), method, "method not found"));
        };
        let Some(body) = &method_decl.body else {
            return Err(EvalError::method(
                method_decl.pos,
                format!("{}.{}", self.name, method),
                "method has no body",
            ));
        };
        tracing::debug!(instance = %self.name, method, "lowering method body");

        let mut frame = self.method_frame();
        frame.push();
        for (param, arg) in method_decl.params.iter().zip(args) {
            frame.define(param.name.clone(), Binding::from_node(arg.clone()));
        }
        let mut lowerer = Lowerer::with_frame(vm, self.env.clone(), frame);
        lowerer.lower_block(body)
    }
}

/// Instance backed by an engine-provided implementation.
pub struct NativeInstance {
    name: String,
    type_name: String,
    object: RwLock<Box<dyn NativeComponent>>,
}

impl NativeInstance {
    /// Wrap a native object.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, object: Box<dyn NativeComponent>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            object: RwLock::new(object),
        }
    }
}

impl fmt::Debug for NativeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeInstance")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .finish()
    }
}

impl ComponentInstance for NativeInstance {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn is_native(&self) -> bool {
        true
    }

    fn get_param(&self, name: &str) -> Option<OpNode> {
        self.object.read().get_param(name).map(OpNode::constant)
    }

    fn set_param(&self, name: &str, node: OpNode, vm: &Vm) -> EvalResult<()> {
        let state = vm.evaluate(&node)?;
        self.object.write().set_param(name, &state).map_err(|err| {
            EvalError::instantiation(
                Pos::default(),
                format!("{}.{}", self.name, name),
                err.to_string(),
            )
        })
    }

    fn get_dependency(&self, _name: &str) -> Option<InstanceHandle> {
        None
    }

    fn set_dependency(&self, name: &str, _instance: InstanceHandle) -> EvalResult<()> {
        Err(EvalError::resolution(
            Pos::default(),
            format!("{}.{}", self.name, name),
            "native components take no dependencies",
        ))
    }

    fn method_arity(&self, method: &str) -> Option<usize> {
        self.object.read().method_arity(method)
    }

    fn invoke_method(self: Arc<Self>, method: &str, args: &[OpNode], vm: &Vm) -> EvalResult<OpNode> {
        check_arity(self.as_ref(), method, args.len())?;
        let states = args
            .iter()
            .map(|arg| vm.evaluate(arg))
            .collect::<EvalResult<Vec<_>>>()?;
        tracing::debug!(instance = %self.name, method, "dispatching native method");
        let state = self.object.read().invoke(method, &states).map_err(|err| {
            EvalError::evaluation(
                Pos::default(),
                format!("{}.{}", self.name, method),
                err.to_string(),
            )
        })?;
        Ok(OpNode::Leaf(state))
    }
}
