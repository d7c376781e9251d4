//! Type inference.
//!
//! One pass per file fills every expression's `inferred_type` and checks it
//! against annotations. Errors are collected rather than returned early;
//! a name whose type is already in error resolves to [`Lookup::Unknown`] so
//! its uses are not reported again.

use std::sync::Arc;

use super::aggregator::AggregatorKind;
use super::ast::{
    BinaryOp, ComponentDecl, Expr, ExprKind, InstanceDecl, MethodDecl, Stmt, StmtKind, SystemDecl,
    SystemItem, UnaryOp,
};
use super::scope::{FileEnv, Lookup, TypeScope, param_type};
use super::types::{ComponentRef, SimpleType, Type};
use super::value::Value;
use crate::outcomes::Metric;
use crate::runtime::error::EvalError;

/// Type-check every component and system declared in `env`.
///
/// Parameter defaults are inferred first so that method bodies and system
/// overrides can see unannotated parameter types.
pub fn check_file(env: &Arc<FileEnv>) -> Vec<EvalError> {
    let mut checker = Checker::default();
    let components: Vec<_> = env.local_components().cloned().collect();
    for component in &components {
        checker.component_signature(env, component);
    }
    for component in &components {
        for method in &component.methods {
            checker.method(env, component, method);
        }
    }
    let systems: Vec<_> = env.local_systems().cloned().collect();
    for system in &systems {
        checker.system(env, system);
    }
    if !checker.errors.is_empty() {
        tracing::debug!(file = env.name(), errors = checker.errors.len(), "type check failed");
    }
    checker.errors
}

/// Check a replacement value for `instance.param` in `system`.
///
/// `expr` sees the system's instances and lets, and must be assignable to
/// the parameter's declared (or default-inferred) type.
pub fn check_param_update(
    env: &Arc<FileEnv>,
    system: &SystemDecl,
    instance: &str,
    param: &str,
    expr: &Expr,
) -> Result<(), EvalError> {
    let mut checker = Checker::default();
    let mut scope = TypeScope::file(env);
    let mut expected = None;
    for item in &system.items {
        match item {
            SystemItem::Instance(decl) => {
                checker.instance(&mut scope, decl);
                if decl.name == instance {
                    expected = scope
                        .env()
                        .component(&decl.component)
                        .and_then(|(component, decl_env)| param_type(&decl_env, &component, param));
                }
            }
            SystemItem::Let { name, value, .. } => {
                let ty = checker.expr(&mut scope, value);
                scope.bind(name.clone(), ty);
            }
            SystemItem::Analyze(_) => {}
        }
    }
    // The system itself was checked at load.
    checker.errors.clear();
    checker.check_assignable(&mut scope, expr, expected.as_ref(), &format!("{instance}.{param}"));
    match checker.errors.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Where `return` statements deliver their value.
enum ReturnSlot {
    /// A method body with an optional declared return type.
    Method(Option<Type>),
    /// An expression block; returns give the block its type.
    Block(Vec<Type>),
}

#[derive(Default)]
struct Checker {
    errors: Vec<EvalError>,
    returns: Vec<ReturnSlot>,
}

fn typed(ty: Type) -> Lookup {
    Lookup::Typed(ty)
}

impl Checker {
    fn report(&mut self, err: EvalError) -> Lookup {
        self.errors.push(err);
        Lookup::Unknown
    }

    fn resolve(&mut self, env: &Arc<FileEnv>, decl: &super::ast::TypeDecl) -> Option<Type> {
        match env.resolve_type(decl) {
            Ok(ty) => Some(ty),
            Err(err) => {
                self.errors.push(err);
                None
            }
        }
    }

    fn component_signature(&mut self, env: &Arc<FileEnv>, component: &Arc<ComponentDecl>) {
        for uses in &component.uses {
            if env.component(&uses.component).is_none() {
                self.errors.push(EvalError::resolution(
                    uses.pos,
                    &uses.component,
                    "unknown component",
                ));
            }
        }
        for method in &component.methods {
            for param in &method.params {
                self.resolve(env, &param.ty);
            }
            if let Some(returns) = &method.returns {
                self.resolve(env, returns);
            }
        }
        let mut scope = TypeScope::component(env, component);
        for param in &component.params {
            let declared = param.ty.as_ref().and_then(|decl| self.resolve(env, decl));
            if let Some(default) = &param.default {
                self.check_assignable(&mut scope, default, declared.as_ref(), &param.name);
            }
        }
    }

    fn method(&mut self, env: &Arc<FileEnv>, component: &Arc<ComponentDecl>, method: &MethodDecl) {
        let Some(body) = &method.body else {
            return;
        };
        let declared = method
            .returns
            .as_ref()
            .and_then(|decl| env.resolve_type(decl).ok());
        let mut scope = TypeScope::method(env, component, method);
        self.returns.push(ReturnSlot::Method(declared));
        self.stmts(&mut scope, body);
        self.returns.pop();
    }

    fn system(&mut self, env: &Arc<FileEnv>, system: &SystemDecl) {
        let mut scope = TypeScope::file(env);
        for item in &system.items {
            match item {
                SystemItem::Instance(instance) => self.instance(&mut scope, instance),
                SystemItem::Let { name, value, .. } => {
                    let ty = self.expr(&mut scope, value);
                    scope.bind(name.clone(), ty);
                }
                SystemItem::Analyze(analyze) => {
                    let target = self.expr(&mut scope, &analyze.target);
                    if let Lookup::Typed(ty @ (Type::Component(_) | Type::Method(..))) = &target {
                        self.errors.push(EvalError::type_error(
                            analyze.target.pos,
                            analyze.target.to_string(),
                            format!("cannot analyze a value of type {ty}"),
                        ));
                    }
                    for clause in &analyze.expectations {
                        if Metric::lookup(&clause.metric).is_none() {
                            self.errors.push(EvalError::resolution(
                                clause.pos,
                                &clause.metric,
                                "unknown metric",
                            ));
                        }
                        if let Some(subject) = &clause.subject {
                            if subject != &analyze.name {
                                self.errors.push(EvalError::resolution(
                                    clause.pos,
                                    subject,
                                    format!("expectation does not belong to analysis '{}'", analyze.name),
                                ));
                            }
                        }
                        if let Lookup::Typed(ty) = self.expr(&mut scope, &clause.threshold) {
                            if !ty.sampled().is_numeric() {
                                self.errors.push(EvalError::type_error(
                                    clause.threshold.pos,
                                    clause.threshold.to_string(),
                                    format!("threshold must be numeric, found {ty}"),
                                ));
                            }
                        }
                        if !clause.op.is_comparison() {
                            self.errors.push(EvalError::type_error(
                                clause.pos,
                                clause.to_string(),
                                format!("'{}' is not a comparison", clause.op),
                            ));
                        }
                    }
                }
            }
        }
    }

    fn instance(&mut self, scope: &mut TypeScope<'_>, instance: &InstanceDecl) {
        let Some((decl, decl_env)) = scope.env().component(&instance.component) else {
            self.errors.push(EvalError::resolution(
                instance.pos,
                &instance.component,
                "unknown component",
            ));
            for item in &instance.overrides {
                self.expr(scope, &item.value);
            }
            scope.bind(instance.name.clone(), Lookup::Unknown);
            return;
        };

        for item in &instance.overrides {
            let subject = format!("{}.{}", instance.name, item.name);
            if decl.param(&item.name).is_some() {
                let expected = param_type(&decl_env, &decl, &item.name);
                self.check_assignable(scope, &item.value, expected.as_ref(), &subject);
            } else if let Some(uses) = decl.dependency(&item.name) {
                let expected = decl_env
                    .component(&uses.component)
                    .map(|(c, e)| Type::Component(ComponentRef::new(&c, &e)));
                match (self.expr(scope, &item.value), expected) {
                    (Lookup::Typed(found @ Type::Component(_)), Some(expected)) if found != expected => {
                        self.errors.push(EvalError::type_error(
                            item.pos,
                            subject,
                            format!("expected a {expected} instance, found {found}"),
                        ));
                    }
                    (Lookup::Typed(Type::Component(_)), _) | (Lookup::Unknown, _) => {}
                    (Lookup::Typed(found), _) => {
                        self.errors.push(EvalError::type_error(
                            item.pos,
                            subject,
                            format!("dependency must be a component instance, found {found}"),
                        ));
                    }
                }
            } else {
                self.expr(scope, &item.value);
                self.errors.push(EvalError::instantiation(
                    item.pos,
                    subject,
                    format!("unknown override target for {}", decl.name),
                ));
            }
        }
        scope.bind(
            instance.name.clone(),
            typed(Type::Component(ComponentRef::new(&decl, &decl_env))),
        );
    }

    /// Infer `expr` and check it against `expected` (or its own annotation).
    fn check_assignable(
        &mut self,
        scope: &mut TypeScope<'_>,
        expr: &Expr,
        expected: Option<&Type>,
        subject: &str,
    ) -> Lookup {
        let found = self.expr(scope, expr);
        if let (Lookup::Typed(found), Some(expected)) = (&found, expected) {
            if !found.assignable_to(expected) {
                return self.report(EvalError::type_error(
                    expr.pos,
                    subject,
                    format!("expected {expected}, found {found}"),
                ));
            }
            return typed(expected.clone());
        }
        found
    }

    fn stmts(&mut self, scope: &mut TypeScope<'_>, stmts: &[Stmt]) -> Lookup {
        let mut last = typed(Type::Nil);
        for stmt in stmts {
            last = self.stmt(scope, stmt);
        }
        last
    }

    fn scoped_stmts(&mut self, scope: &mut TypeScope<'_>, stmts: &[Stmt]) -> Lookup {
        scope.push();
        let ty = self.stmts(scope, stmts);
        scope.pop();
        ty
    }

    fn stmt(&mut self, scope: &mut TypeScope<'_>, stmt: &Stmt) -> Lookup {
        match &stmt.kind {
            StmtKind::Let { name, value } => {
                let ty = self.expr(scope, value);
                scope.bind(name.clone(), ty);
                typed(Type::Nil)
            }
            StmtKind::Set { name, value } => {
                let Some(existing) = scope.lookup(name) else {
                    self.expr(scope, value);
                    return self.report(EvalError::resolution(
                        stmt.pos,
                        name,
                        "assignment to an undeclared name",
                    ));
                };
                let found = self.expr(scope, value);
                if let (Lookup::Typed(existing), Lookup::Typed(found)) = (&existing, &found) {
                    if !found.assignable_to(existing) {
                        self.errors.push(EvalError::type_error(
                            value.pos,
                            name,
                            format!("expected {existing}, found {found}"),
                        ));
                    }
                }
                typed(Type::Nil)
            }
            StmtKind::Expr(expr) => self.expr(scope, expr),
            StmtKind::Return(value) => {
                let found = match value {
                    Some(expr) => self.expr(scope, expr),
                    None => typed(Type::Nil),
                };
                self.record_return(stmt, value.as_ref(), &found);
                found
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expect_condition(scope, condition, "condition");
                self.scoped_stmts(scope, then_branch);
                if let Some(else_branch) = else_branch {
                    self.scoped_stmts(scope, else_branch);
                }
                typed(Type::Nil)
            }
            StmtKind::For { count, body } => {
                if let Lookup::Typed(ty) = self.expr(scope, count) {
                    if ty.sampled() != &Type::INT {
                        self.errors.push(EvalError::type_error(
                            count.pos,
                            count.to_string(),
                            format!("loop count must be int, found {ty}"),
                        ));
                    }
                }
                self.scoped_stmts(scope, body);
                typed(Type::Nil)
            }
            StmtKind::Switch {
                subject,
                cases,
                default,
            } => {
                let subject_ty = self.expr(scope, subject);
                for case in cases {
                    let case_ty = self.expr(scope, &case.value);
                    if let (Lookup::Typed(s), Lookup::Typed(c)) = (&subject_ty, &case_ty) {
                        if s.sampled().unify(c).is_none() || !c.supports_equality() {
                            self.errors.push(EvalError::type_error(
                                case.value.pos,
                                case.value.to_string(),
                                format!("case of type {c} cannot match a {s} subject"),
                            ));
                        }
                    }
                    self.scoped_stmts(scope, &case.body);
                }
                if let Some(default) = default {
                    self.scoped_stmts(scope, default);
                }
                typed(Type::Nil)
            }
            StmtKind::Delay(duration) => {
                if let Lookup::Typed(ty) = self.expr(scope, duration) {
                    if !ty.sampled().is_numeric() {
                        self.errors.push(EvalError::type_error(
                            duration.pos,
                            duration.to_string(),
                            format!("delay expects a duration, found {ty}"),
                        ));
                    }
                }
                typed(Type::Nil)
            }
            StmtKind::Go { name, body } => {
                let ty = self.expr(scope, body);
                scope.bind_future(name.clone(), ty);
                typed(Type::Nil)
            }
            StmtKind::Wait { names, aggregator } => {
                for name in names {
                    if !scope.is_future(name) {
                        self.errors.push(EvalError::type_error(
                            stmt.pos,
                            name,
                            "wait expects a future started by 'go'",
                        ));
                    }
                }
                if let Some(aggregator) = aggregator {
                    if AggregatorKind::lookup(aggregator).is_none() {
                        self.errors.push(EvalError::resolution(
                            stmt.pos,
                            aggregator,
                            "unknown aggregator",
                        ));
                    }
                }
                typed(Type::Nil)
            }
            StmtKind::Log(args) => {
                for arg in args {
                    self.expr(scope, arg);
                }
                typed(Type::Nil)
            }
            StmtKind::Block(stmts) => self.scoped_stmts(scope, stmts),
        }
    }

    fn record_return(&mut self, stmt: &Stmt, value: Option<&Expr>, found: &Lookup) {
        let subject = value.map(ToString::to_string).unwrap_or_else(|| "return".to_string());
        let err = match (self.returns.last_mut(), found) {
            (Some(ReturnSlot::Block(types)), Lookup::Typed(ty)) => {
                types.push(ty.clone());
                None
            }
            (Some(ReturnSlot::Method(Some(expected))), Lookup::Typed(ty)) => {
                if ty.assignable_to(expected) || (value.is_none() && *expected == Type::BOOL) {
                    None
                } else {
                    Some(EvalError::method(
                        stmt.pos,
                        subject,
                        format!("return type mismatch: expected {expected}, found {ty}"),
                    ))
                }
            }
            _ => None,
        };
        if let Some(err) = err {
            self.errors.push(err);
        }
    }

    fn expect_condition(&mut self, scope: &mut TypeScope<'_>, expr: &Expr, what: &str) {
        if let Lookup::Typed(ty) = self.expr(scope, expr) {
            if ty.sampled() != &Type::BOOL {
                self.errors.push(EvalError::type_error(
                    expr.pos,
                    expr.to_string(),
                    format!("{what} must be bool, found {ty}"),
                ));
            }
        }
    }

    /// Infer an expression, record the result and check its annotation.
    fn expr(&mut self, scope: &mut TypeScope<'_>, expr: &Expr) -> Lookup {
        let found = self.infer(scope, expr);
        let Lookup::Typed(ty) = found else {
            return Lookup::Unknown;
        };
        expr.inferred_type.set(ty.clone());
        if let Some(decl) = &expr.declared_type {
            let env = scope.env();
            let Some(declared) = self.resolve(env, decl) else {
                return Lookup::Unknown;
            };
            if !ty.assignable_to(&declared) {
                return self.report(EvalError::type_error(
                    expr.pos,
                    expr.to_string(),
                    format!("declared {declared}, found {ty}"),
                ));
            }
            return typed(declared);
        }
        typed(ty)
    }

    fn infer(&mut self, scope: &mut TypeScope<'_>, expr: &Expr) -> Lookup {
        match &expr.kind {
            ExprKind::Literal(value) => self.literal(scope, expr, value),
            ExprKind::Ident(name) => match scope.lookup(name) {
                Some(found) => found,
                None => self.report(EvalError::resolution(expr.pos, name, "unknown identifier")),
            },
            ExprKind::Member { receiver, field } => self.member(scope, expr, receiver, field),
            ExprKind::Index { target, index } => {
                let target_ty = self.expr(scope, target);
                let index_ty = self.expr(scope, index);
                self.index(expr, index, target_ty, index_ty)
            }
            ExprKind::Call { callee, args } => self.call(scope, expr, callee, args),
            ExprKind::Unary { op, operand } => {
                let Lookup::Typed(ty) = self.expr(scope, operand) else {
                    return Lookup::Unknown;
                };
                let inner = ty.sampled().clone();
                match op {
                    UnaryOp::Not if inner == Type::BOOL => typed(Type::BOOL),
                    UnaryOp::Neg if inner.is_numeric() => typed(inner),
                    _ => self.report(EvalError::type_error(
                        expr.pos,
                        expr.to_string(),
                        format!("operator '{op}' cannot be applied to {ty}"),
                    )),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.expr(scope, left);
                let r = self.expr(scope, right);
                match (l, r) {
                    (Lookup::Typed(l), Lookup::Typed(r)) => self.binary(expr, *op, &l, &r),
                    _ => Lookup::Unknown,
                }
            }
            ExprKind::Tuple(items) => {
                let mut types = Vec::with_capacity(items.len());
                let mut unknown = false;
                for item in items {
                    match self.expr(scope, item) {
                        Lookup::Typed(ty) => types.push(ty),
                        Lookup::Unknown => unknown = true,
                    }
                }
                if unknown {
                    Lookup::Unknown
                } else {
                    typed(Type::Tuple(types))
                }
            }
            ExprKind::List(items) => {
                let types: Vec<Lookup> = items.iter().map(|item| self.expr(scope, item)).collect();
                match self.common_type(expr, &types, "list elements") {
                    Some(element) => typed(Type::List(Box::new(element))),
                    None => Lookup::Unknown,
                }
            }
            ExprKind::Distribute {
                total,
                cases,
                default,
            } => {
                if let Some(total) = total {
                    self.expect_numeric(scope, total, "distribute total");
                }
                let mut bodies = Vec::with_capacity(cases.len() + 1);
                for case in cases {
                    self.expect_numeric(scope, &case.weight, "distribute weight");
                    bodies.push(self.expr(scope, &case.body));
                }
                if let Some(default) = default {
                    bodies.push(self.expr(scope, default));
                }
                match self.common_type(expr, &bodies, "distribute branches") {
                    Some(Type::Nil) => typed(Type::Nil),
                    Some(ty) => typed(Type::Outcomes(Box::new(ty.sampled().clone()))),
                    None => Lookup::Unknown,
                }
            }
            ExprKind::Sample(inner) => match self.expr(scope, inner) {
                Lookup::Typed(ty) => typed(ty.sampled().clone()),
                Lookup::Unknown => Lookup::Unknown,
            },
            ExprKind::Block(stmts) => {
                self.returns.push(ReturnSlot::Block(Vec::new()));
                let last = self.scoped_stmts(scope, stmts);
                let Some(ReturnSlot::Block(returned)) = self.returns.pop() else {
                    return Lookup::Unknown;
                };
                if returned.is_empty() {
                    last
                } else {
                    let lookups: Vec<Lookup> = returned.into_iter().map(Lookup::Typed).collect();
                    match self.common_type(expr, &lookups, "returned values") {
                        Some(ty) => typed(ty),
                        None => Lookup::Unknown,
                    }
                }
            }
        }
    }

    fn literal(&mut self, scope: &TypeScope<'_>, expr: &Expr, value: &Value) -> Lookup {
        match value {
            Value::Bool(_) => typed(Type::BOOL),
            Value::Int(_) => typed(Type::INT),
            Value::Float(_) => typed(Type::FLOAT),
            Value::Str(_) => typed(Type::STRING),
            Value::Enum { ty, .. } => match scope.env().enum_decl(ty) {
                Some(decl) => typed(Type::Enum(decl.clone())),
                None => self.report(EvalError::resolution(expr.pos, ty, "unknown type")),
            },
            Value::Tuple(_) | Value::List(_) => Lookup::Unknown,
        }
    }

    fn expect_numeric(&mut self, scope: &mut TypeScope<'_>, expr: &Expr, what: &str) {
        if let Lookup::Typed(ty) = self.expr(scope, expr) {
            if !ty.sampled().is_numeric() {
                self.errors.push(EvalError::type_error(
                    expr.pos,
                    expr.to_string(),
                    format!("{what} must be numeric, found {ty}"),
                ));
            }
        }
    }

    /// Unify a set of branch types, reporting the first conflict.
    fn common_type(&mut self, expr: &Expr, types: &[Lookup], what: &str) -> Option<Type> {
        let mut common: Option<Type> = None;
        for lookup in types {
            let Lookup::Typed(ty) = lookup else {
                return None;
            };
            common = match common {
                None => Some(ty.clone()),
                Some(acc) => match acc.unify(ty) {
                    Some(unified) => Some(unified),
                    None => {
                        self.errors.push(EvalError::type_error(
                            expr.pos,
                            expr.to_string(),
                            format!("{what} have no common type ({acc} and {ty})"),
                        ));
                        return None;
                    }
                },
            };
        }
        common
    }

    fn member(&mut self, scope: &mut TypeScope<'_>, expr: &Expr, receiver: &Expr, field: &str) -> Lookup {
        if let ExprKind::Ident(name) = &receiver.kind {
            if scope.lookup(name).is_none() {
                if let Some(decl) = scope.env().enum_decl(name).cloned() {
                    if decl.variants.iter().any(|v| v == field) {
                        receiver.inferred_type.set(Type::Enum(decl.clone()));
                        return typed(Type::Enum(decl));
                    }
                    return self.report(EvalError::resolution(
                        expr.pos,
                        expr.to_string(),
                        format!("enum {} has no variant '{}'", decl.name, field),
                    ));
                }
            }
        }

        let Lookup::Typed(receiver_ty) = self.expr(scope, receiver) else {
            return Lookup::Unknown;
        };
        if let Type::Component(component) = &receiver_ty {
            let Some((decl, env)) = component.resolve() else {
                return Lookup::Unknown;
            };
            if decl.param(field).is_some() {
                return param_type(&env, &decl, field).map(Lookup::Typed).unwrap_or(Lookup::Unknown);
            }
            if let Some(uses) = decl.dependency(field) {
                return env
                    .component(&uses.component)
                    .map(|(c, e)| typed(Type::Component(ComponentRef::new(&c, &e))))
                    .unwrap_or(Lookup::Unknown);
            }
            if decl.method(field).is_some() {
                return typed(Type::Method(component.clone(), field.to_string()));
            }
            return self.report(EvalError::resolution(
                expr.pos,
                expr.to_string(),
                format!("{} has no member '{}'", decl.name, field),
            ));
        }
        if matches!(receiver_ty, Type::Method(..)) {
            return self.report(EvalError::method(expr.pos, expr.to_string(), "method must be called"));
        }
        if field == "Len" {
            typed(Type::INT)
        } else if Metric::lookup(field).is_some() {
            typed(Type::FLOAT)
        } else {
            self.report(EvalError::resolution(
                expr.pos,
                expr.to_string(),
                format!("{receiver_ty} has no member '{field}'"),
            ))
        }
    }

    fn index(&mut self, expr: &Expr, index: &Expr, target: Lookup, index_ty: Lookup) -> Lookup {
        let (Lookup::Typed(target), Lookup::Typed(index_ty)) = (target, index_ty) else {
            return Lookup::Unknown;
        };
        if index_ty.sampled() != &Type::INT {
            return self.report(EvalError::type_error(
                index.pos,
                index.to_string(),
                format!("index must be int, found {index_ty}"),
            ));
        }
        match target.sampled() {
            Type::List(element) => typed((**element).clone()),
            Type::Tuple(elements) => match &index.kind {
                ExprKind::Literal(Value::Int(i)) => match usize::try_from(*i).ok().and_then(|i| elements.get(i)) {
                    Some(element) => typed(element.clone()),
                    None => self.report(EvalError::type_error(
                        index.pos,
                        expr.to_string(),
                        format!("index {i} out of range for {target}"),
                    )),
                },
                _ => Lookup::Unknown,
            },
            other => self.report(EvalError::type_error(
                expr.pos,
                expr.to_string(),
                format!("{other} cannot be indexed"),
            )),
        }
    }

    fn call(&mut self, scope: &mut TypeScope<'_>, expr: &Expr, callee: &Expr, args: &[Expr]) -> Lookup {
        let arg_types: Vec<Lookup> = args.iter().map(|arg| self.expr(scope, arg)).collect();

        let target = match &callee.kind {
            ExprKind::Ident(name) if scope.lookup(name).is_none() => {
                let Some(component) = scope.current_component() else {
                    return self.report(EvalError::resolution(expr.pos, name, "unknown method"));
                };
                if component.method(name).is_none() {
                    return self.report(EvalError::resolution(expr.pos, name, "unknown method"));
                }
                let env = scope.env().clone();
                Some((ComponentRef::new(component, &env), name.clone()))
            }
            _ => match self.expr(scope, callee) {
                Lookup::Typed(Type::Method(component, method)) => Some((component, method)),
                Lookup::Typed(other) => {
                    return self.report(EvalError::method(
                        expr.pos,
                        callee.to_string(),
                        format!("{other} is not callable"),
                    ));
                }
                Lookup::Unknown => None,
            },
        };
        let Some((component, method)) = target else {
            return Lookup::Unknown;
        };
        let Some((decl, env)) = component.resolve() else {
            return Lookup::Unknown;
        };
        let Some(method_decl) = decl.method(&method) else {
            return self.report(EvalError::method(
                expr.pos,
                callee.to_string(),
                format!("{} has no method '{}'", decl.name, method),
            ));
        };
        callee
            .inferred_type
            .set(Type::Method(component.clone(), method.clone()));

        if method_decl.params.len() != args.len() {
            return self.report(EvalError::type_error(
                expr.pos,
                expr.to_string(),
                format!("expected {} argument(s), got {}", method_decl.params.len(), args.len()),
            ));
        }
        for ((param, arg), found) in method_decl.params.iter().zip(args).zip(&arg_types) {
            let (Ok(expected), Lookup::Typed(found)) = (env.resolve_type(&param.ty), found) else {
                continue;
            };
            if !found.assignable_to(&expected) {
                self.errors.push(EvalError::type_error(
                    arg.pos,
                    arg.to_string(),
                    format!("argument '{}' expects {}, found {}", param.name, expected, found),
                ));
            }
        }
        match &method_decl.returns {
            Some(returns) => env.resolve_type(returns).map(Lookup::Typed).unwrap_or(Lookup::Unknown),
            None => typed(Type::Nil),
        }
    }

    fn binary(&mut self, expr: &Expr, op: BinaryOp, left: &Type, right: &Type) -> Lookup {
        let l = left.sampled();
        let r = right.sampled();
        let mismatch = |checker: &mut Self| {
            checker.report(EvalError::type_error(
                expr.pos,
                expr.to_string(),
                format!("operator '{op}' cannot combine {left} and {right}"),
            ))
        };
        match op {
            BinaryOp::And | BinaryOp::Or => {
                if *l == Type::BOOL && *r == Type::BOOL {
                    typed(Type::BOOL)
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::Add if *l == Type::STRING && *r == Type::STRING => typed(Type::STRING),
            BinaryOp::Mod => {
                if *l == Type::INT && *r == Type::INT {
                    typed(Type::INT)
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                match (l, r) {
                    (Type::Simple(SimpleType::Int), Type::Simple(SimpleType::Int)) => typed(Type::INT),
                    _ if l.is_numeric() && r.is_numeric() => typed(Type::FLOAT),
                    _ => mismatch(self),
                }
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if left.supports_equality() && right.supports_equality() && l.unify(r).is_some() {
                    typed(Type::BOOL)
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordered = (l.is_numeric() && r.is_numeric()) || (*l == Type::STRING && *r == Type::STRING);
                if ordered {
                    typed(Type::BOOL)
                } else {
                    mismatch(self)
                }
            }
            BinaryOp::Index => match l {
                Type::List(element) if *r == Type::INT => typed((**element).clone()),
                _ => mismatch(self),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::parse_file;
    use std::collections::HashMap;

    fn check(src: &str) -> Vec<EvalError> {
        let file = parse_file("t.sdl", src).unwrap();
        let env = Arc::new(FileEnv::build(file, &HashMap::new()).unwrap());
        check_file(&env)
    }

    fn messages(errors: &[EvalError]) -> Vec<String> {
        errors.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn well_typed_disk_passes() {
        let errors = check(
            r#"
            component Disk {
                param FailureProb: float = 0.01;
                param ReadLatency: duration = 10ms;
                method Read(): bool {
                    distribute {
                        FailureProb => { delay 10s; return false }
                        default => { delay ReadLatency; return true }
                    }
                }
            }
            system S {
                instance d: Disk = { FailureProb = 0.5 };
                analyze r = d.Read() expect { availability >= 0.4; };
            }
            "#,
        );
        assert!(errors.is_empty(), "{:?}", messages(&errors));
    }

    #[test]
    fn unannotated_params_take_their_default_type() {
        let file = parse_file("t.sdl", "component C { param N = 3; method M(): int { return N + 1 } }").unwrap();
        let env = Arc::new(FileEnv::build(file, &HashMap::new()).unwrap());
        assert!(check_file(&env).is_empty());
        let component = env.local_components().next().unwrap();
        assert_eq!(param_type(&env, component, "N"), Some(Type::INT));
    }

    #[test]
    fn errors_are_collected_across_siblings() {
        let errors = check(
            r#"
            component C {
                param A: int = "text";
                method M(): bool {
                    if 3 { return true }
                    delay "soon";
                    for 1.5 { }
                    return 1
                }
            }
            "#,
        );
        let kinds: Vec<_> = errors.iter().map(EvalError::kind).collect();
        assert_eq!(kinds, vec!["type", "type", "type", "type", "method"], "{:?}", messages(&errors));
    }

    #[test]
    fn unknown_names_do_not_cascade() {
        let errors = check("component C { method M(): bool { let x = missing; return x && x } }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].located().subject, "missing");
    }

    #[test]
    fn operators_follow_widening_rules() {
        let errors = check(
            r#"
            component C {
                method A(): float { return 1 + 2.5 }
                method B(): string { return "a" + "b" }
                method D(): bool { return 3 % 2.0 == 1 }
                method E(): bool { return [1, 2] == [1, 2] }
            }
            "#,
        );
        let subjects: Vec<_> = errors.iter().map(|e| e.located().subject.clone()).collect();
        assert_eq!(errors.len(), 2, "{:?}", messages(&errors));
        assert!(subjects[0].contains('%'));
        assert!(subjects[1].contains("=="));
    }

    #[test]
    fn calls_check_arity_and_argument_types() {
        let errors = check(
            r#"
            component Svc {
                method Get(key: int): bool { return true }
                method Ok(): bool { return Get(1) }
                method Bad(): bool { return self.Get("k") }
                method Short(): bool { return self.Get() }
            }
            "#,
        );
        let kinds: Vec<_> = errors.iter().map(EvalError::kind).collect();
        assert_eq!(kinds, vec!["type", "type"], "{:?}", messages(&errors));
    }

    #[test]
    fn overrides_and_dependencies_are_checked() {
        let errors = check(
            r#"
            component Disk { param Lat: duration = 1ms; method Read(): bool { delay Lat; return true } }
            component Cache { method Hit(): bool { return true } }
            component Front { uses disk: Disk; method Read(): bool { return disk.Read() } }
            system S {
                instance c: Cache;
                instance d: Disk = { Lat = "slow" };
                instance f: Front = { disk = c, speed = 3 };
            }
            "#,
        );
        let kinds: Vec<_> = errors.iter().map(EvalError::kind).collect();
        assert_eq!(kinds, vec!["type", "type", "instantiation"], "{:?}", messages(&errors));
    }

    #[test]
    fn wait_requires_futures_and_known_aggregators() {
        let errors = check(
            r#"
            component C {
                method M(): bool {
                    let x = 1;
                    go a = true;
                    wait a, x using Quorum;
                    return true
                }
            }
            "#,
        );
        assert_eq!(errors.len(), 2, "{:?}", messages(&errors));
        assert_eq!(errors[0].located().subject, "x");
        assert_eq!(errors[1].located().subject, "Quorum");
    }

    #[test]
    fn distribute_has_outcome_type() {
        let file = parse_file(
            "t.sdl",
            "component C { method M(): bool { let d = distribute { 1 => true 2 => false }; return d } }",
        )
        .unwrap();
        let env = Arc::new(FileEnv::build(file, &HashMap::new()).unwrap());
        assert!(check_file(&env).is_empty());
    }

    #[test]
    fn equality_on_distributions_is_rejected() {
        let errors = check(
            r#"
            component C {
                method M(): bool { return distribute { 1 => true, 1 => false } == true }
                method S(): bool { let v = sample distribute { 1 => 1, 1 => 2 }; return v != 2 }
            }
            "#,
        );
        assert_eq!(errors.len(), 1, "{:?}", messages(&errors));
        assert_eq!(errors[0].kind(), "type");
        assert!(errors[0].located().subject.contains("=="));
    }

    #[test]
    fn analyze_expectations_need_known_metrics_and_numbers() {
        let errors = check(
            r#"
            component C { method M(): bool { return true } }
            system S {
                instance c: C;
                analyze r = c.M() expect { r.bogus > 1; availability > "high"; };
            }
            "#,
        );
        let kinds: Vec<_> = errors.iter().map(EvalError::kind).collect();
        assert_eq!(kinds, vec!["resolution", "type"], "{:?}", messages(&errors));
    }
}
