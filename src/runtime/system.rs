//! System instantiation
//!
//! A `system` block is evaluated item by item in one frame: `instance`
//! declarations build component instances and bind them by name, `let`
//! items bind lowered nodes, and `analyze` items are kept for the analysis
//! layer.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::component::{ComponentInstance, InstanceHandle, NativeInstance, UserDefinedInstance};
use super::error::{EvalError, EvalResult};
use crate::interpreter::ast::{AnalyzeDecl, Expr, InstanceDecl, SystemDecl, SystemItem};
use crate::interpreter::frame::{Binding, Frame};
use crate::interpreter::ir::OpNode;
use crate::interpreter::scope::FileEnv;
use crate::interpreter::{Lowerer, Vm};

/// A built system: its frame of instances and bindings.
pub struct SystemInstance {
    decl: Arc<SystemDecl>,
    env: Arc<FileEnv>,
    frame: Frame,
    instances: Vec<InstanceHandle>,
}

impl SystemInstance {
    /// Evaluate the instance and let items of `decl`.
    pub fn build(vm: &Vm, env: &Arc<FileEnv>, decl: &Arc<SystemDecl>) -> EvalResult<Self> {
        let mut lowerer = Lowerer::new(vm, env.clone());
        let mut instances = Vec::new();
        for item in &decl.items {
            match item {
                SystemItem::Instance(instance) => {
                    instances.push(instantiate(&mut lowerer, instance)?);
                }
                SystemItem::Let { name, value, pos } => {
                    let node = lowerer.lower_expr(value)?;
                    lowerer
                        .frame_mut()
                        .define_unique(name, Binding::from_node(node), *pos)?;
                }
                SystemItem::Analyze(_) => {}
            }
        }
        tracing::debug!(system = %decl.name, instances = instances.len(), "system built");
        Ok(Self {
            decl: decl.clone(),
            env: env.clone(),
            frame: lowerer.into_frame(),
            instances,
        })
    }

    /// System name.
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    /// Declaration.
    pub fn decl(&self) -> &Arc<SystemDecl> {
        &self.decl
    }

    /// File the system was declared in.
    pub fn env(&self) -> &Arc<FileEnv> {
        &self.env
    }

    /// Frame holding the system's bindings.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Instances in declaration order.
    pub fn instances(&self) -> &[InstanceHandle] {
        &self.instances
    }

    /// Instance bound under `name`.
    pub fn instance(&self, name: &str) -> Option<InstanceHandle> {
        match self.frame.lookup(name) {
            Some(Binding::Instance(instance)) => Some(instance.clone()),
            _ => None,
        }
    }

    /// `analyze` items in declaration order.
    pub fn analyses(&self) -> impl Iterator<Item = &AnalyzeDecl> {
        self.decl.analyses()
    }

    /// Lower an expression against the system's bindings. The system frame
    /// itself is not modified.
    pub fn lower(&self, vm: &Vm, expr: &Expr) -> EvalResult<OpNode> {
        let mut lowerer = Lowerer::with_frame(vm, self.env.clone(), self.frame.clone());
        lowerer.lower_expr(expr)
    }
}

impl fmt::Debug for SystemInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemInstance")
            .field("name", &self.decl.name)
            .field("instances", &self.instances)
            .finish()
    }
}

/// Build one instance and bind it in the lowerer's frame.
///
/// Overrides are lowered in the system frame; parameter defaults are lowered
/// in the component's own file, seeing the parameters set before them.
pub fn instantiate(lowerer: &mut Lowerer<'_>, decl: &InstanceDecl) -> EvalResult<InstanceHandle> {
    let vm = lowerer.vm();
    let (component, component_env) = lowerer
        .env()
        .component(&decl.component)
        .ok_or_else(|| EvalError::resolution(decl.pos, &decl.component, "unknown component"))?;

    let handle: InstanceHandle = if component.is_native {
        let object = vm.natives().create(&component.name, &decl.name).ok_or_else(|| {
            EvalError::instantiation(
                decl.pos,
                &decl.component,
                "no native implementation is registered for this component",
            )
        })?;
        let instance = Arc::new(NativeInstance::new(&decl.name, &component.name, object));
        let mut assigned = HashSet::new();
        for item in &decl.overrides {
            if component.dependency(&item.name).is_some() {
                return Err(EvalError::instantiation(
                    item.pos,
                    format!("{}.{}", decl.name, item.name),
                    "native components take no dependencies",
                ));
            }
            let node = lowerer.lower_expr(&item.value)?;
            instance.set_param(&item.name, node, vm).map_err(|err| at(err, item.pos))?;
            assigned.insert(item.name.as_str());
        }
        let mut defaults = Lowerer::new(vm, component_env.clone());
        for param in &component.params {
            if assigned.contains(param.name.as_str()) {
                continue;
            }
            let Some(default) = &param.default else {
                return Err(EvalError::instantiation(
                    decl.pos,
                    format!("{}.{}", decl.name, param.name),
                    "missing required parameter",
                ));
            };
            let node = defaults.lower_expr(default)?;
            instance.set_param(&param.name, node, vm).map_err(|err| at(err, param.pos))?;
        }
        instance
    } else {
        let instance = Arc::new(UserDefinedInstance::new(
            &decl.name,
            component.clone(),
            component_env.clone(),
        ));
        let mut deps = HashSet::new();
        for item in &decl.overrides {
            let subject = format!("{}.{}", decl.name, item.name);
            if component.param(&item.name).is_some() {
                let node = lowerer.lower_expr(&item.value)?;
                instance.override_param(&item.name, node);
            } else if component.dependency(&item.name).is_some() {
                match lowerer.lower_expr(&item.value)? {
                    OpNode::InstanceRef(dependency) => {
                        instance
                            .set_dependency(&item.name, dependency)
                            .map_err(|err| at(err, item.pos))?;
                        deps.insert(item.name.as_str());
                    }
                    _ => {
                        return Err(EvalError::instantiation(
                            item.pos,
                            subject,
                            "dependency must be bound to a component instance",
                        ));
                    }
                }
            } else {
                return Err(EvalError::instantiation(
                    item.pos,
                    subject,
                    format!("unknown override target for {}", component.name),
                ));
            }
        }

        instance.derive_defaults(vm, decl.pos)?;
        if let Some(missing) = component.uses.iter().find(|u| !deps.contains(u.name.as_str())) {
            return Err(EvalError::instantiation(
                decl.pos,
                format!("{}.{}", decl.name, missing.name),
                format!("unsatisfied dependency on {}", missing.component),
            ));
        }
        instance
    };

    lowerer
        .frame_mut()
        .define_unique(&decl.name, Binding::Instance(handle.clone()), decl.pos)?;
    tracing::debug!(instance = %decl.name, component = %component.name, "instantiated");
    Ok(handle)
}

/// Attach a position to an error raised without one.
fn at(err: EvalError, pos: crate::interpreter::Pos) -> EvalError {
    let located = err.located();
    if located.pos != crate::interpreter::Pos::default() {
        return err;
    }
    let (subject, message) = (located.subject.clone(), located.message.clone());
    match err {
        EvalError::Resolution(_) => EvalError::resolution(pos, subject, message),
        EvalError::Type(_) => EvalError::type_error(pos, subject, message),
        EvalError::Instantiation(_) => EvalError::instantiation(pos, subject, message),
        EvalError::Evaluation(_) => EvalError::evaluation(pos, subject, message),
        EvalError::Method(_) => EvalError::method(pos, subject, message),
        EvalError::Analysis(_) => EvalError::analysis(pos, subject, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{Value, parse_file};
    use std::collections::HashMap;

    fn system(src: &str) -> EvalResult<SystemInstance> {
        let file = parse_file("t.sdl", src).unwrap();
        let env = Arc::new(FileEnv::build(file, &HashMap::new()).unwrap());
        let decl = env.local_systems().next().unwrap().clone();
        SystemInstance::build(&Vm::default(), &env, &decl)
    }

    const DISKS: &str = r#"
        component Disk {
            param FailureProb: float = 0.01;
            param Slow = FailureProb * 2;
            method Read(): bool { return true }
        }
        component Front {
            uses disk: Disk;
            method Read(): bool { return disk.Read() }
        }
    "#;

    #[test]
    fn overrides_and_defaults_are_stored_in_order() {
        let sys = system(&format!(
            "{DISKS} system S {{ instance d: Disk = {{ FailureProb = 0.5 }}; instance f: Front = {{ disk = d }}; }}"
        ))
        .unwrap();
        let disk = sys.instance("d").unwrap();
        let slow = disk.get_param("Slow").unwrap();
        assert_eq!(slow.as_constant().and_then(|s| s.scalar_value()), Some(&Value::Float(1.0)));
        let front = sys.instance("f").unwrap();
        assert_eq!(front.get_dependency("disk").unwrap().instance_name(), "d");
        assert_eq!(sys.instances().len(), 2);
    }

    #[test]
    fn unsatisfied_dependencies_fail() {
        let err = system(&format!("{DISKS} system S {{ instance f: Front; }}")).unwrap_err();
        assert_eq!(err.kind(), "instantiation");
        assert_eq!(err.located().subject, "f.disk");
    }

    #[test]
    fn unknown_override_targets_fail() {
        let err = system(&format!("{DISKS} system S {{ instance d: Disk = {{ Speed = 3 }}; }}")).unwrap_err();
        assert_eq!(err.kind(), "instantiation");
        assert_eq!(err.located().subject, "d.Speed");
    }

    #[test]
    fn shadowing_an_instance_fails() {
        let err = system(&format!("{DISKS} system S {{ instance d: Disk; instance d: Disk; }}")).unwrap_err();
        assert_eq!(err.kind(), "instantiation");
    }

    #[test]
    fn missing_parameters_fail() {
        let err = system("component C { param N: int; } system S { instance c: C; }").unwrap_err();
        assert_eq!(err.located().subject, "c.N");
    }

    #[test]
    fn native_parameters_without_value_fail() {
        let err = system(
            r#"
            native component Profile { param P50: float; method Call(): bool; }
            system S { instance p: Profile; }
            "#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "instantiation");
        assert_eq!(err.located().subject, "p.P50");
    }

    #[test]
    fn native_overrides_reach_the_object() {
        let sys = system(
            r#"
            native component Profile { param P50: float; method Call(): bool; }
            system S { instance p: Profile = { P50 = 5ms, FailureProb = 0.25 }; }
            "#,
        )
        .unwrap();
        let profile = sys.instance("p").unwrap();
        assert!(profile.is_native());
        let failure = profile.get_param("FailureProb").unwrap();
        assert_eq!(failure.as_constant().and_then(|s| s.scalar_value()), Some(&Value::Float(0.25)));
    }
}
