use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::ast::{BinaryOp, UnaryOp};

/// Discrete runtime value carried on the value track of a joint state.
///
/// Durations are plain `Float` seconds; the surface `duration` type is an
/// alias of `float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean (the only type with a success interpretation).
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Enum variant.
    Enum {
        /// Declaring enum name.
        ty: String,
        /// Variant name.
        variant: String,
    },
    /// Fixed-arity heterogeneous tuple.
    Tuple(Vec<Value>),
    /// Homogeneous list.
    List(Vec<Value>),
}

impl Value {
    /// Success interpretation used by availability and split-aware trimming.
    /// Defined for booleans only.
    pub fn is_success(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Numeric view (ints widen to floats).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Integer view.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        self.is_success()
    }

    /// Surface name of the value's type, used in error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "string".into(),
            Value::Enum { ty, .. } => ty.clone(),
            Value::Tuple(items) => {
                let names: Vec<String> = items.iter().map(Value::type_name).collect();
                format!("({})", names.join(", "))
            }
            Value::List(_) => "List".into(),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Apply a unary operator.
    pub fn apply_unary(&self, op: UnaryOp) -> Result<Value, String> {
        match (op, self) {
            (UnaryOp::Not, Value::Bool(flag)) => Ok(Value::Bool(!flag)),
            (UnaryOp::Neg, Value::Int(n)) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| "integer overflow in negation".to_string()),
            (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
            (op, value) => Err(format!("operator '{}' is not defined on {}", op, value.type_name())),
        }
    }

    /// Apply a binary operator pointwise.
    pub fn apply_binary(&self, op: BinaryOp, rhs: &Value) -> Result<Value, String> {
        use BinaryOp::*;
        match op {
            Add | Sub | Mul | Div | Mod => self.arithmetic(op, rhs),
            Eq => Ok(Value::Bool(self.loosely_equals(rhs))),
            Ne => Ok(Value::Bool(!self.loosely_equals(rhs))),
            Lt | Le | Gt | Ge => {
                let ordering = self.compare(rhs).ok_or_else(|| {
                    format!("cannot compare {} with {}", self.type_name(), rhs.type_name())
                })?;
                let holds = match op {
                    Lt => ordering == Ordering::Less,
                    Le => ordering != Ordering::Greater,
                    Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                Ok(Value::Bool(holds))
            }
            And | Or => match (self, rhs) {
                (Value::Bool(a), Value::Bool(b)) => {
                    Ok(Value::Bool(if op == And { *a && *b } else { *a || *b }))
                }
                _ => Err(format!("operator '{}' requires bool operands", op)),
            },
            Index => self.index(rhs),
        }
    }

    fn arithmetic(&self, op: BinaryOp, rhs: &Value) -> Result<Value, String> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                let result = match op {
                    BinaryOp::Add => a.checked_add(*b),
                    BinaryOp::Sub => a.checked_sub(*b),
                    BinaryOp::Mul => a.checked_mul(*b),
                    BinaryOp::Div | BinaryOp::Mod if *b == 0 => {
                        return Err("integer division by zero".into());
                    }
                    BinaryOp::Div => a.checked_div(*b),
                    _ => a.checked_rem(*b),
                };
                result
                    .map(Value::Int)
                    .ok_or_else(|| format!("integer overflow in '{}'", op))
            }
            (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Ok(Value::Str(format!("{a}{b}"))),
            (a, b) if a.is_numeric() && b.is_numeric() && op != BinaryOp::Mod => {
                let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                let result = match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    _ => x / y,
                };
                if result.is_finite() {
                    Ok(Value::Float(result))
                } else {
                    Err(format!("non-finite result in '{}'", op))
                }
            }
            (a, b) => Err(format!(
                "operator '{}' is not defined on {} and {}",
                op,
                a.type_name(),
                b.type_name()
            )),
        }
    }

    /// Equality with int/float widening.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64() == b.as_f64(),
            (a, b) => a == b,
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn index(&self, idx: &Value) -> Result<Value, String> {
        let position = idx
            .as_int()
            .ok_or_else(|| format!("index must be an int, found {}", idx.type_name()))?;
        let items = match self {
            Value::Tuple(items) | Value::List(items) => items,
            other => return Err(format!("cannot index into {}", other.type_name())),
        };
        usize::try_from(position)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| format!("index {} out of range for length {}", position, items.len()))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(text) => write!(f, "{text:?}"),
            Value::Enum { ty, variant } => write!(f, "{ty}.{variant}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_widens_mixed_operands() {
        let sum = Value::Int(2).apply_binary(BinaryOp::Add, &Value::Float(0.5)).unwrap();
        assert_eq!(sum, Value::Float(2.5));
        let product = Value::Int(3).apply_binary(BinaryOp::Mul, &Value::Int(4)).unwrap();
        assert_eq!(product, Value::Int(12));
    }

    #[test]
    fn modulo_requires_ints() {
        assert!(Value::Float(1.0).apply_binary(BinaryOp::Mod, &Value::Int(2)).is_err());
        assert_eq!(
            Value::Int(7).apply_binary(BinaryOp::Mod, &Value::Int(4)),
            Ok(Value::Int(3))
        );
        assert!(Value::Int(7).apply_binary(BinaryOp::Div, &Value::Int(0)).is_err());
    }

    #[test]
    fn comparisons_and_equality() {
        assert_eq!(
            Value::Float(0.01).apply_binary(BinaryOp::Lt, &Value::Float(0.1)),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            Value::Int(1).apply_binary(BinaryOp::Eq, &Value::Float(1.0)),
            Ok(Value::Bool(true))
        );
        assert!(Value::Bool(true).apply_binary(BinaryOp::Lt, &Value::Int(1)).is_err());
    }

    #[test]
    fn strings_concatenate() {
        let joined = Value::Str("a".into())
            .apply_binary(BinaryOp::Add, &Value::Str("b".into()))
            .unwrap();
        assert_eq!(joined, Value::Str("ab".into()));
    }

    #[test]
    fn success_is_defined_for_bools_only() {
        assert_eq!(Value::Bool(false).is_success(), Some(false));
        assert_eq!(Value::Int(1).is_success(), None);
    }
}
