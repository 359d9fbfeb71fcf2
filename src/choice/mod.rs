//! Choice system for the Conjecture engine
//!
//! All randomness a test consumes flows through strongly-typed choices. Each
//! choice is drawn under a [`Constraints`] value, and the pair of value and
//! constraints is what the shrinker reasons about: it may only ever replace a
//! value with another value the same constraints permit.

mod constraints;
mod indexing;
mod intervals;
mod node;

pub use self::constraints::*;
pub use self::indexing::*;
pub use self::intervals::IntervalSet;
pub use self::node::ChoiceNode;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Choice types that can be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChoiceType {
    Integer,
    Boolean,
    Float,
    String,
    Bytes,
}

impl fmt::Display for ChoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChoiceType::Integer => "integer",
            ChoiceType::Boolean => "boolean",
            ChoiceType::Float => "float",
            ChoiceType::String => "string",
            ChoiceType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// A concrete value drawn for one choice.
///
/// Equality and hashing compare floats bitwise, so `NaN == NaN` and
/// `0.0 != -0.0`. That is the notion of identity replay needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChoiceValue {
    Integer(i128),
    Boolean(bool),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl ChoiceValue {
    pub fn choice_type(&self) -> ChoiceType {
        match self {
            ChoiceValue::Integer(_) => ChoiceType::Integer,
            ChoiceValue::Boolean(_) => ChoiceType::Boolean,
            ChoiceValue::Float(_) => ChoiceType::Float,
            ChoiceValue::String(_) => ChoiceType::String,
            ChoiceValue::Bytes(_) => ChoiceType::Bytes,
        }
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            ChoiceValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            ChoiceValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ChoiceValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ChoiceValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ChoiceValue::Bytes(value) => Some(value),
            _ => None,
        }
    }
}

impl PartialEq for ChoiceValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ChoiceValue::Integer(a), ChoiceValue::Integer(b)) => a == b,
            (ChoiceValue::Boolean(a), ChoiceValue::Boolean(b)) => a == b,
            (ChoiceValue::Float(a), ChoiceValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ChoiceValue::String(a), ChoiceValue::String(b)) => a == b,
            (ChoiceValue::Bytes(a), ChoiceValue::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ChoiceValue {}

impl Hash for ChoiceValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ChoiceValue::Integer(value) => value.hash(state),
            ChoiceValue::Boolean(value) => value.hash(state),
            ChoiceValue::Float(value) => value.to_bits().hash(state),
            ChoiceValue::String(value) => value.hash(state),
            ChoiceValue::Bytes(value) => value.hash(state),
        }
    }
}

impl fmt::Display for ChoiceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChoiceValue::Integer(value) => write!(f, "{}", value),
            ChoiceValue::Boolean(value) => write!(f, "{}", value),
            ChoiceValue::Float(value) => write!(f, "{:?}", value),
            ChoiceValue::String(value) => write!(f, "{:?}", value),
            ChoiceValue::Bytes(value) => write!(f, "{:02x?}", value),
        }
    }
}

/// The constraint a choice was drawn under, one variant per [`ChoiceType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraints {
    Integer(IntegerConstraints),
    Boolean(BooleanConstraints),
    Float(FloatConstraints),
    String(StringConstraints),
    Bytes(BytesConstraints),
}

impl Constraints {
    pub fn choice_type(&self) -> ChoiceType {
        match self {
            Constraints::Integer(_) => ChoiceType::Integer,
            Constraints::Boolean(_) => ChoiceType::Boolean,
            Constraints::Float(_) => ChoiceType::Float,
            Constraints::String(_) => ChoiceType::String,
            Constraints::Bytes(_) => ChoiceType::Bytes,
        }
    }

    /// Whether `value` is of the right kind and satisfies these constraints.
    pub fn permits(&self, value: &ChoiceValue) -> bool {
        match (self, value) {
            (Constraints::Integer(c), ChoiceValue::Integer(v)) => c.permits(*v),
            (Constraints::Boolean(c), ChoiceValue::Boolean(v)) => c.permits(*v),
            (Constraints::Float(c), ChoiceValue::Float(v)) => c.permits(*v),
            (Constraints::String(c), ChoiceValue::String(v)) => c.permits(v),
            (Constraints::Bytes(c), ChoiceValue::Bytes(v)) => c.permits(v),
            _ => false,
        }
    }

    /// The value at complexity index zero.
    pub fn simplest(&self) -> ChoiceValue {
        match self {
            Constraints::Integer(c) => ChoiceValue::Integer(c.simplest()),
            Constraints::Boolean(c) => ChoiceValue::Boolean(c.simplest()),
            Constraints::Float(c) => ChoiceValue::Float(c.simplest()),
            Constraints::String(c) => ChoiceValue::String(c.simplest()),
            Constraints::Bytes(c) => ChoiceValue::Bytes(c.simplest()),
        }
    }

    /// Rejects constraints no value could satisfy.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Constraints::Integer(c) => c.validate(),
            Constraints::Boolean(c) => c.validate(),
            Constraints::Float(c) => c.validate(),
            Constraints::String(c) => c.validate(),
            Constraints::Bytes(c) => c.validate(),
        }
    }

    /// Number of distinct permitted values, when that is finite and small
    /// enough to count.
    pub fn cardinality(&self) -> Option<u128> {
        match self {
            Constraints::Integer(c) => c.cardinality(),
            Constraints::Boolean(c) => Some(c.cardinality()),
            Constraints::Float(c) => c.cardinality(),
            Constraints::String(c) => c.cardinality(),
            Constraints::Bytes(c) => c.cardinality(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_values_compare_bitwise() {
        assert_eq!(ChoiceValue::Float(f64::NAN), ChoiceValue::Float(f64::NAN));
        assert_ne!(ChoiceValue::Float(0.0), ChoiceValue::Float(-0.0));
    }

    #[test]
    fn values_of_different_kinds_are_never_equal() {
        assert_ne!(ChoiceValue::Integer(0), ChoiceValue::Boolean(false));
        assert_ne!(
            ChoiceValue::String(String::new()),
            ChoiceValue::Bytes(Vec::new())
        );
    }

    #[test]
    fn permits_rejects_kind_mismatch() {
        let constraints = Constraints::Integer(IntegerConstraints::default());
        assert!(constraints.permits(&ChoiceValue::Integer(-7)));
        assert!(!constraints.permits(&ChoiceValue::Boolean(true)));
    }

    #[test]
    fn choice_type_display_names() {
        assert_eq!(ChoiceType::Integer.to_string(), "integer");
        assert_eq!(ChoiceType::Bytes.to_string(), "bytes");
    }
}
