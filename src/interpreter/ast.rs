use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use super::Pos;
use super::types::Type;
use super::value::Value;

/// A parsed SDL file.
#[derive(Debug, Clone, Default)]
pub struct File {
    /// Logical name (usually the path) used in diagnostics.
    pub name: String,
    /// Import declarations in source order.
    pub imports: Vec<ImportDecl>,
    /// Top-level declarations in source order.
    pub decls: Vec<Decl>,
}

/// Top-level declaration.
#[derive(Debug, Clone)]
pub enum Decl {
    /// `enum Name { A, B }`
    Enum(Arc<EnumDecl>),
    /// `[native] component Name { ... }`
    Component(Arc<ComponentDecl>),
    /// `system Name { ... }`
    System(Arc<SystemDecl>),
}

impl Decl {
    /// Declared name.
    pub fn name(&self) -> &str {
        match self {
            Decl::Enum(decl) => &decl.name,
            Decl::Component(decl) => &decl.name,
            Decl::System(decl) => &decl.name,
        }
    }

    /// Declaration position.
    pub fn pos(&self) -> Pos {
        match self {
            Decl::Enum(decl) => decl.pos,
            Decl::Component(decl) => decl.pos,
            Decl::System(decl) => decl.pos,
        }
    }
}

/// `import A, B as C from "path";`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    /// Path, relative to the importing file.
    pub path: String,
    /// Imported names.
    pub items: Vec<ImportItem>,
    /// Position of the `import` keyword.
    pub pos: Pos,
}

/// One imported name with its optional local alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportItem {
    /// Name in the imported file.
    pub name: String,
    /// Local alias.
    pub alias: Option<String>,
}

impl ImportItem {
    /// Name the symbol is bound under locally.
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Enum declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    /// Enum name.
    pub name: String,
    /// Variant names in order.
    pub variants: Vec<String>,
    /// Declaration position.
    pub pos: Pos,
}

/// Component declaration.
#[derive(Debug, Clone)]
pub struct ComponentDecl {
    /// Component type name.
    pub name: String,
    /// Whether methods are provided by a registered native implementation.
    pub is_native: bool,
    /// Parameters in declaration order.
    pub params: Vec<ParamDecl>,
    /// Dependencies in declaration order.
    pub uses: Vec<UsesDecl>,
    /// Methods in declaration order.
    pub methods: Vec<MethodDecl>,
    /// Declaration position.
    pub pos: Pos,
}

impl ComponentDecl {
    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Look up a dependency by name.
    pub fn dependency(&self, name: &str) -> Option<&UsesDecl> {
        self.uses.iter().find(|u| u.name == name)
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// `param Name [: Type] [= default];`
#[derive(Debug, Clone)]
pub struct ParamDecl {
    /// Parameter name.
    pub name: String,
    /// Declared type.
    pub ty: Option<TypeDecl>,
    /// Default value expression.
    pub default: Option<Expr>,
    /// Declaration position.
    pub pos: Pos,
}

/// `uses name: Component;`
#[derive(Debug, Clone, PartialEq)]
pub struct UsesDecl {
    /// Dependency name.
    pub name: String,
    /// Required component type name.
    pub component: String,
    /// Declaration position.
    pub pos: Pos,
}

/// Method declaration.
#[derive(Debug, Clone)]
pub struct MethodDecl {
    /// Method name.
    pub name: String,
    /// Positional parameters.
    pub params: Vec<MethodParam>,
    /// Declared return type.
    pub returns: Option<TypeDecl>,
    /// Body; `None` for native signatures.
    pub body: Option<Vec<Stmt>>,
    /// Declaration position.
    pub pos: Pos,
}

/// One method parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodParam {
    /// Parameter name.
    pub name: String,
    /// Declared type.
    pub ty: TypeDecl,
}

/// `system Name { ... }`
#[derive(Debug, Clone)]
pub struct SystemDecl {
    /// System name.
    pub name: String,
    /// Body items, evaluated in order.
    pub items: Vec<SystemItem>,
    /// Declaration position.
    pub pos: Pos,
}

impl SystemDecl {
    /// Analyze blocks in declaration order.
    pub fn analyses(&self) -> impl Iterator<Item = &AnalyzeDecl> {
        self.items.iter().filter_map(|item| match item {
            SystemItem::Analyze(analyze) => Some(analyze),
            _ => None,
        })
    }
}

/// Items allowed inside a system body.
#[derive(Debug, Clone)]
pub enum SystemItem {
    /// Component instantiation.
    Instance(InstanceDecl),
    /// System-level binding.
    Let {
        /// Bound name.
        name: String,
        /// Bound expression.
        value: Expr,
        /// Statement position.
        pos: Pos,
    },
    /// Analysis target with expectations.
    Analyze(AnalyzeDecl),
}

/// `instance name: Type = { Param = expr; ... };`
#[derive(Debug, Clone)]
pub struct InstanceDecl {
    /// Instance name.
    pub name: String,
    /// Component type name.
    pub component: String,
    /// Parameter and dependency overrides.
    pub overrides: Vec<Override>,
    /// Declaration position.
    pub pos: Pos,
}

/// One `name = expr` override.
#[derive(Debug, Clone)]
pub struct Override {
    /// Target parameter or dependency.
    pub name: String,
    /// Assigned expression.
    pub value: Expr,
    /// Override position.
    pub pos: Pos,
}

/// `analyze name = target expect { ... };`
#[derive(Debug, Clone)]
pub struct AnalyzeDecl {
    /// Analysis name.
    pub name: String,
    /// Target expression (normally a method call).
    pub target: Expr,
    /// Attached expectations.
    pub expectations: Vec<ExpectClause>,
    /// Declaration position.
    pub pos: Pos,
}

/// `[name.]metric op threshold`
#[derive(Debug, Clone)]
pub struct ExpectClause {
    /// Optional analysis-name qualifier.
    pub subject: Option<String>,
    /// Metric name as written.
    pub metric: String,
    /// Comparison operator.
    pub op: BinaryOp,
    /// Threshold expression.
    pub threshold: Expr,
    /// Clause position.
    pub pos: Pos,
}

impl fmt::Display for ExpectClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(subject) = &self.subject {
            write!(f, "{subject}.")?;
        }
        write!(f, "{} {} {}", self.metric, self.op, self.threshold)
    }
}

/// Surface type annotation: `Name` or `Name[Arg, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    /// Type constructor name.
    pub name: String,
    /// Type arguments.
    pub args: Vec<TypeDecl>,
    /// Annotation position.
    pub pos: Pos,
}

impl fmt::Display for TypeDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "[")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Interior slot filled by type inference.
#[derive(Debug, Default)]
pub struct TypeSlot(RwLock<Option<Type>>);

impl TypeSlot {
    /// Current inferred type.
    pub fn get(&self) -> Option<Type> {
        self.0.read().clone()
    }

    /// Record an inferred type.
    pub fn set(&self, ty: Type) {
        *self.0.write() = Some(ty);
    }
}

impl Clone for TypeSlot {
    fn clone(&self) -> Self {
        Self(RwLock::new(self.get()))
    }
}

/// Expression node.
#[derive(Debug, Clone)]
pub struct Expr {
    /// Expression shape.
    pub kind: ExprKind,
    /// Source position.
    pub pos: Pos,
    /// Annotation supplied by the surrounding declaration, if any.
    pub declared_type: Option<TypeDecl>,
    /// Type recorded by inference.
    pub inferred_type: TypeSlot,
}

impl Expr {
    /// Build an unannotated expression.
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        Self {
            kind,
            pos,
            declared_type: None,
            inferred_type: TypeSlot::default(),
        }
    }

    /// Attach a declared type.
    pub fn with_declared_type(mut self, ty: Option<TypeDecl>) -> Self {
        self.declared_type = ty;
        self
    }
}

/// Expression shapes.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Literal value (durations are float seconds).
    Literal(Value),
    /// Bare identifier.
    Ident(String),
    /// `receiver.field`
    Member {
        /// Receiver expression.
        receiver: Box<Expr>,
        /// Member name.
        field: String,
    },
    /// `target[index]`
    Index {
        /// Indexed expression.
        target: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// `callee(args...)`
    Call {
        /// Callee, normally `receiver.method`.
        callee: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
    },
    /// Prefix operator.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Infix operator.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `(a, b, ...)`
    Tuple(Vec<Expr>),
    /// `[a, b, ...]`
    List(Vec<Expr>),
    /// `distribute [total] { w => body ... default => body }`
    Distribute {
        /// Explicit total weight.
        total: Option<Box<Expr>>,
        /// Weighted cases.
        cases: Vec<DistributeCase>,
        /// Residual branch.
        default: Option<Box<Expr>>,
    },
    /// `sample [from] expr`
    Sample(Box<Expr>),
    /// `{ statements }` used in expression position.
    Block(Vec<Stmt>),
}

/// One weighted `distribute` case.
#[derive(Debug, Clone)]
pub struct DistributeCase {
    /// Weight expression.
    pub weight: Expr,
    /// Branch body.
    pub body: Expr,
}

/// Statement node.
#[derive(Debug, Clone)]
pub struct Stmt {
    /// Statement shape.
    pub kind: StmtKind,
    /// Source position.
    pub pos: Pos,
}

/// Statement shapes.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `let name = value`
    Let {
        /// Bound name.
        name: String,
        /// Bound expression.
        value: Expr,
    },
    /// `set name = value` or `name = value`
    Set {
        /// Rebound name.
        name: String,
        /// New expression.
        value: Expr,
    },
    /// Expression statement.
    Expr(Expr),
    /// `return [value]`
    Return(Option<Expr>),
    /// `if cond { ... } [else ...]`
    If {
        /// Condition.
        condition: Expr,
        /// Then branch.
        then_branch: Vec<Stmt>,
        /// Else branch (an `else if` is a single nested `If`).
        else_branch: Option<Vec<Stmt>>,
    },
    /// `for count { ... }`
    For {
        /// Iteration count.
        count: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `switch subject { case v => ...; default => ... }`
    Switch {
        /// Scrutinee.
        subject: Expr,
        /// Cases in order.
        cases: Vec<SwitchCase>,
        /// Fallback branch.
        default: Option<Vec<Stmt>>,
    },
    /// `delay duration`
    Delay(Expr),
    /// `go name = expr` or `go name { ... }`
    Go {
        /// Future name.
        name: String,
        /// Future body.
        body: Expr,
    },
    /// `wait a, b [using Aggregator]`
    Wait {
        /// Awaited future names.
        names: Vec<String>,
        /// Aggregator name.
        aggregator: Option<String>,
    },
    /// `log args...`
    Log(Vec<Expr>),
    /// Nested block.
    Block(Vec<Stmt>),
}

/// One `switch` case.
#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// Matched value.
    pub value: Expr,
    /// Case body.
    pub body: Vec<Stmt>,
}

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
    /// Element access `a[i]`, produced when lowering index expressions.
    Index,
}

impl BinaryOp {
    /// Whether the operator is an ordering or equality comparison.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Whether the operator is arithmetic.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    /// Apply a comparison to two floats; `None` for non-comparison operators.
    pub fn compare_f64(self, lhs: f64, rhs: f64) -> Option<bool> {
        Some(match self {
            BinaryOp::Eq => lhs == rhs,
            BinaryOp::Ne => lhs != rhs,
            BinaryOp::Lt => lhs < rhs,
            BinaryOp::Le => lhs <= rhs,
            BinaryOp::Gt => lhs > rhs,
            BinaryOp::Ge => lhs >= rhs,
            _ => return None,
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Index => "[]",
        };
        f.write_str(text)
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Neg,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
        })
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(value) => write!(f, "{value}"),
            ExprKind::Ident(name) => f.write_str(name),
            ExprKind::Member { receiver, field } => write!(f, "{receiver}.{field}"),
            ExprKind::Index { target, index } => write!(f, "{target}[{index}]"),
            ExprKind::Call { callee, args } => {
                write!(f, "{callee}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::Unary { op, operand } => write!(f, "{op}{operand}"),
            ExprKind::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            ExprKind::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
            ExprKind::List(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            ExprKind::Distribute { cases, default, .. } => {
                write!(f, "distribute {{ {} cases", cases.len())?;
                if default.is_some() {
                    write!(f, " + default")?;
                }
                write!(f, " }}")
            }
            ExprKind::Sample(inner) => write!(f, "sample {inner}"),
            ExprKind::Block(stmts) => write!(f, "{{ {} statements }}", stmts.len()),
        }
    }
}
