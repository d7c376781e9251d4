use std::fmt;
use std::sync::{Arc, Weak};

use super::ast::{ComponentDecl, EnumDecl};
use super::scope::FileEnv;

/// Primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimpleType {
    /// `bool`
    Bool,
    /// `int`
    Int,
    /// `float` (and its alias `duration`)
    Float,
    /// `string`
    String,
}

/// Reference to a component declaration together with the file that
/// declared it. Held weakly: declarations own expressions whose inferred
/// types point back at components.
#[derive(Debug, Clone)]
pub struct ComponentRef {
    /// Component type name as declared.
    pub name: String,
    /// Declaration.
    pub decl: Weak<ComponentDecl>,
    /// Declaring file.
    pub env: Weak<FileEnv>,
}

impl ComponentRef {
    /// Build a reference.
    pub fn new(decl: &Arc<ComponentDecl>, env: &Arc<FileEnv>) -> Self {
        Self {
            name: decl.name.clone(),
            decl: Arc::downgrade(decl),
            env: Arc::downgrade(env),
        }
    }

    /// Upgrade to the declaration and its file.
    pub fn resolve(&self) -> Option<(Arc<ComponentDecl>, Arc<FileEnv>)> {
        Some((self.decl.upgrade()?, self.env.upgrade()?))
    }
}

impl PartialEq for ComponentRef {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.decl, &other.decl)
    }
}

/// Static type of an expression.
#[derive(Debug, Clone)]
pub enum Type {
    /// Primitive.
    Simple(SimpleType),
    /// Tuple of element types.
    Tuple(Vec<Type>),
    /// Homogeneous list.
    List(Box<Type>),
    /// Distribution over an element type.
    Outcomes(Box<Type>),
    /// Enum, compared by declaration identity.
    Enum(Arc<EnumDecl>),
    /// Component, compared by declaration identity.
    Component(ComponentRef),
    /// Unapplied method of a component.
    Method(ComponentRef, String),
    /// Statement-shaped expressions.
    Nil,
}

impl Type {
    /// `bool`
    pub const BOOL: Type = Type::Simple(SimpleType::Bool);
    /// `int`
    pub const INT: Type = Type::Simple(SimpleType::Int);
    /// `float`
    pub const FLOAT: Type = Type::Simple(SimpleType::Float);
    /// `string`
    pub const STRING: Type = Type::Simple(SimpleType::String);

    /// Whether the type is `int` or `float`.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Simple(SimpleType::Int | SimpleType::Float))
    }

    /// Strip an `Outcomes[..]` wrapper (implicit sampling).
    pub fn sampled(&self) -> &Type {
        match self {
            Type::Outcomes(inner) => inner.sampled(),
            other => other,
        }
    }

    /// Whether `==`/`!=` may be applied.
    pub fn supports_equality(&self) -> bool {
        !matches!(
            self,
            Type::List(_) | Type::Tuple(_) | Type::Outcomes(_) | Type::Component(_) | Type::Method(..)
        )
    }

    /// Whether a value of type `self` may be used where `target` is
    /// expected. Ints widen to floats and `Outcomes[T]` samples to `T`.
    pub fn assignable_to(&self, target: &Type) -> bool {
        if self == target {
            return true;
        }
        match (self, target) {
            (Type::Simple(SimpleType::Int), Type::Simple(SimpleType::Float)) => true,
            (Type::Outcomes(inner), Type::Outcomes(expected)) => inner.assignable_to(expected),
            (Type::Outcomes(inner), expected) => inner.assignable_to(expected),
            (Type::List(a), Type::List(b)) => a.assignable_to(b),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.assignable_to(y))
            }
            _ => false,
        }
    }

    /// Least common type of two branches, if any.
    pub fn unify(&self, other: &Type) -> Option<Type> {
        if self.assignable_to(other) {
            Some(other.clone())
        } else if other.assignable_to(self) {
            Some(self.clone())
        } else {
            None
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Simple(a), Type::Simple(b)) => a == b,
            (Type::Tuple(a), Type::Tuple(b)) => a == b,
            (Type::List(a), Type::List(b)) => a == b,
            (Type::Outcomes(a), Type::Outcomes(b)) => a == b,
            (Type::Enum(a), Type::Enum(b)) => Arc::ptr_eq(a, b),
            (Type::Component(a), Type::Component(b)) => a == b,
            (Type::Method(a, m), Type::Method(b, n)) => a == b && m == n,
            (Type::Nil, Type::Nil) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Simple(SimpleType::Bool) => f.write_str("bool"),
            Type::Simple(SimpleType::Int) => f.write_str("int"),
            Type::Simple(SimpleType::Float) => f.write_str("float"),
            Type::Simple(SimpleType::String) => f.write_str("string"),
            Type::Tuple(items) => {
                write!(f, "Tuple[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Type::List(inner) => write!(f, "List[{inner}]"),
            Type::Outcomes(inner) => write!(f, "Outcomes[{inner}]"),
            Type::Enum(decl) => f.write_str(&decl.name),
            Type::Component(component) => f.write_str(&component.name),
            Type::Method(component, method) => write!(f, "{}.{}", component.name, method),
            Type::Nil => f.write_str("nil"),
        }
    }
}
