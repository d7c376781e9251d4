use std::collections::HashMap;
use std::sync::Arc;

use super::ast::{ComponentDecl, Decl, EnumDecl, File, MethodDecl, SystemDecl, TypeDecl};
use super::types::{ComponentRef, SimpleType, Type};
use crate::runtime::error::{EvalError, EvalResult};

/// A name registered at file scope.
#[derive(Debug, Clone)]
pub enum Symbol {
    /// Enum declaration.
    Enum(Arc<EnumDecl>),
    /// Component declaration; `origin` is the declaring file when imported.
    Component {
        /// Declaration.
        decl: Arc<ComponentDecl>,
        /// Declaring file for imported components.
        origin: Option<Arc<FileEnv>>,
    },
    /// System declaration.
    System(Arc<SystemDecl>),
}

/// Read-only declaration registry of one loaded file: its own declarations
/// plus the names it imports.
#[derive(Debug)]
pub struct FileEnv {
    name: String,
    file: File,
    symbols: HashMap<String, Symbol>,
}

impl FileEnv {
    /// Register the declarations of `file`. `imports` maps each import path
    /// (as written) to the already-loaded file it names.
    pub fn build(
        file: File,
        imports: &HashMap<String, Arc<FileEnv>>,
    ) -> Result<FileEnv, Vec<EvalError>> {
        let mut symbols: HashMap<String, Symbol> = HashMap::new();
        let mut errors = Vec::new();

        for import in &file.imports {
            let Some(source) = imports.get(&import.path) else {
                errors.push(EvalError::resolution(
                    import.pos,
                    &import.path,
                    "import was not loaded",
                ));
                continue;
            };
            for item in &import.items {
                let symbol = match source.symbols.get(&item.name) {
                    Some(Symbol::Component { decl, origin: None }) => Symbol::Component {
                        decl: decl.clone(),
                        origin: Some(source.clone()),
                    },
                    Some(other) => other.clone(),
                    None => {
                        errors.push(EvalError::resolution(
                            import.pos,
                            &item.name,
                            format!("not declared in \"{}\"", import.path),
                        ));
                        continue;
                    }
                };
                let local = item.local_name().to_string();
                if symbols.insert(local.clone(), symbol).is_some() {
                    errors.push(EvalError::resolution(import.pos, local, "imported twice"));
                }
            }
        }

        for decl in &file.decls {
            let symbol = match decl {
                Decl::Enum(e) => Symbol::Enum(e.clone()),
                Decl::Component(c) => Symbol::Component {
                    decl: c.clone(),
                    origin: None,
                },
                Decl::System(s) => Symbol::System(s.clone()),
            };
            if symbols.insert(decl.name().to_string(), symbol).is_some() {
                errors.push(EvalError::resolution(
                    decl.pos(),
                    decl.name(),
                    "duplicate definition",
                ));
            }
        }

        if errors.is_empty() {
            Ok(FileEnv {
                name: file.name.clone(),
                file,
                symbols,
            })
        } else {
            Err(errors)
        }
    }

    /// Logical file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parsed file.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Look up any file-scope symbol.
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Look up an enum by name.
    pub fn enum_decl(&self, name: &str) -> Option<&Arc<EnumDecl>> {
        match self.symbols.get(name) {
            Some(Symbol::Enum(decl)) => Some(decl),
            _ => None,
        }
    }

    /// Look up a system by name.
    pub fn system(&self, name: &str) -> Option<&Arc<SystemDecl>> {
        match self.symbols.get(name) {
            Some(Symbol::System(decl)) => Some(decl),
            _ => None,
        }
    }

    /// Names of all systems visible in this file, sorted.
    pub fn system_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .symbols
            .iter()
            .filter(|(_, s)| matches!(s, Symbol::System(_)))
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Look up a component together with the file that declared it.
    pub fn component(self: &Arc<Self>, name: &str) -> Option<(Arc<ComponentDecl>, Arc<FileEnv>)> {
        match self.symbols.get(name)? {
            Symbol::Component { decl, origin } => Some((
                decl.clone(),
                origin.clone().unwrap_or_else(|| self.clone()),
            )),
            _ => None,
        }
    }

    /// Components declared (not imported) by this file.
    pub fn local_components(&self) -> impl Iterator<Item = &Arc<ComponentDecl>> {
        self.file.decls.iter().filter_map(|decl| match decl {
            Decl::Component(c) => Some(c),
            _ => None,
        })
    }

    /// Systems declared by this file.
    pub fn local_systems(&self) -> impl Iterator<Item = &Arc<SystemDecl>> {
        self.file.decls.iter().filter_map(|decl| match decl {
            Decl::System(s) => Some(s),
            _ => None,
        })
    }

    /// Resolve a surface type annotation.
    pub fn resolve_type(self: &Arc<Self>, decl: &TypeDecl) -> EvalResult<Type> {
        let arity = |expected: usize| -> EvalResult<()> {
            if decl.args.len() == expected {
                Ok(())
            } else {
                Err(EvalError::type_error(
                    decl.pos,
                    decl.to_string(),
                    format!("'{}' takes {} type argument(s)", decl.name, expected),
                ))
            }
        };
        let ty = match decl.name.as_str() {
            "bool" => Type::Simple(SimpleType::Bool),
            "int" => Type::Simple(SimpleType::Int),
            "float" | "duration" => Type::Simple(SimpleType::Float),
            "string" => Type::Simple(SimpleType::String),
            "List" => {
                arity(1)?;
                Type::List(Box::new(self.resolve_type(&decl.args[0])?))
            }
            "Outcomes" => {
                arity(1)?;
                Type::Outcomes(Box::new(self.resolve_type(&decl.args[0])?))
            }
            "Tuple" => Type::Tuple(
                decl.args
                    .iter()
                    .map(|arg| self.resolve_type(arg))
                    .collect::<EvalResult<Vec<_>>>()?,
            ),
            name => match self.symbols.get(name) {
                Some(Symbol::Enum(e)) => {
                    arity(0)?;
                    Type::Enum(e.clone())
                }
                Some(Symbol::Component { .. }) => {
                    arity(0)?;
                    let (component, env) = self.component(name).ok_or_else(|| {
                        EvalError::resolution(decl.pos, name, "unknown type")
                    })?;
                    Type::Component(ComponentRef::new(&component, &env))
                }
                _ => return Err(EvalError::resolution(decl.pos, name, "unknown type")),
            },
        };
        Ok(ty)
    }
}

/// What a name resolves to during inference.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A name with a known type.
    Typed(Type),
    /// A name whose type could not be determined; errors were already
    /// reported, so uses are not re-checked.
    Unknown,
}

/// Lexical type environment used by inference. Resolution order: local
/// scopes (innermost first), `self`, method parameters, component
/// parameters and dependencies, then file-scope names.
#[derive(Debug)]
pub struct TypeScope<'a> {
    env: &'a Arc<FileEnv>,
    component: Option<&'a Arc<ComponentDecl>>,
    method: Option<&'a MethodDecl>,
    locals: Vec<HashMap<String, Lookup>>,
    futures: Vec<Vec<String>>,
}

impl<'a> TypeScope<'a> {
    /// Scope for file-level and system-level expressions.
    pub fn file(env: &'a Arc<FileEnv>) -> Self {
        Self {
            env,
            component: None,
            method: None,
            locals: vec![HashMap::new()],
            futures: vec![Vec::new()],
        }
    }

    /// Scope for expressions inside a component (parameter defaults).
    pub fn component(env: &'a Arc<FileEnv>, component: &'a Arc<ComponentDecl>) -> Self {
        Self {
            component: Some(component),
            ..Self::file(env)
        }
    }

    /// Scope for a method body.
    pub fn method(
        env: &'a Arc<FileEnv>,
        component: &'a Arc<ComponentDecl>,
        method: &'a MethodDecl,
    ) -> Self {
        Self {
            method: Some(method),
            ..Self::component(env, component)
        }
    }

    /// File this scope resolves global names in.
    pub fn env(&self) -> &'a Arc<FileEnv> {
        self.env
    }

    /// Enclosing component.
    pub fn current_component(&self) -> Option<&'a Arc<ComponentDecl>> {
        self.component
    }

    /// Enclosing method.
    pub fn current_method(&self) -> Option<&'a MethodDecl> {
        self.method
    }

    /// Enter a nested block.
    pub fn push(&mut self) {
        self.locals.push(HashMap::new());
        self.futures.push(Vec::new());
    }

    /// Leave a nested block.
    pub fn pop(&mut self) {
        if self.locals.len() > 1 {
            self.locals.pop();
            self.futures.pop();
        }
    }

    /// Bind a local name in the innermost scope.
    pub fn bind(&mut self, name: impl Into<String>, ty: Lookup) {
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(name.into(), ty);
        }
    }

    /// Record a future name registered by `go`.
    pub fn bind_future(&mut self, name: impl Into<String>, ty: Lookup) {
        let name = name.into();
        if let Some(futures) = self.futures.last_mut() {
            futures.push(name.clone());
        }
        self.bind(name, ty);
    }

    /// Whether `name` was registered by `go` in an enclosing scope.
    pub fn is_future(&self, name: &str) -> bool {
        self.futures.iter().rev().any(|f| f.iter().any(|n| n == name))
    }

    /// Resolve a value name.
    pub fn lookup(&self, name: &str) -> Option<Lookup> {
        for scope in self.locals.iter().rev() {
            if let Some(found) = scope.get(name) {
                return Some(found.clone());
            }
        }
        if let Some(component) = self.component {
            if name == "self" {
                return Some(Lookup::Typed(Type::Component(ComponentRef::new(
                    component, self.env,
                ))));
            }
            if let Some(method) = self.method {
                if let Some(param) = method.params.iter().find(|p| p.name == name) {
                    return Some(self.typed(self.env.resolve_type(&param.ty).ok()));
                }
            }
            if component.param(name).is_some() {
                return Some(self.typed(param_type(self.env, component, name)));
            }
            if let Some(uses) = component.dependency(name) {
                return Some(self.typed(
                    self.env
                        .component(&uses.component)
                        .map(|(decl, env)| Type::Component(ComponentRef::new(&decl, &env))),
                ));
            }
        }
        None
    }

    fn typed(&self, ty: Option<Type>) -> Lookup {
        ty.map(Lookup::Typed).unwrap_or(Lookup::Unknown)
    }
}

/// Type of a component parameter: its annotation if present, otherwise the
/// type inferred for its default.
pub fn param_type(env: &Arc<FileEnv>, component: &ComponentDecl, name: &str) -> Option<Type> {
    let param = component.param(name)?;
    match &param.ty {
        Some(decl) => env.resolve_type(decl).ok(),
        None => param.default.as_ref().and_then(|d| d.inferred_type.get()),
    }
}
