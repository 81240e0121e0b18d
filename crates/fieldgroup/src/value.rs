#![forbid(unsafe_code)]

//! Dynamic slot values.
//!
//! Records expose heterogeneous slots, so every cell stores a [`Value`] and
//! declares the [`TypeTag`] it accepts. `Null` fits any tag; `TypeTag::Any`
//! fits any value.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Declared type of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TypeTag {
    Any,
    Bool,
    Int,
    Float,
    Text,
}

impl TypeTag {
    /// Whether a cell declared with this tag may hold `value`.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value.type_tag()) {
            (Self::Any, _) | (_, None) => true,
            (tag, Some(found)) => tag == found,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// A value held by a slot.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Concrete tag of this value; `None` for `Null`.
    #[must_use]
    pub fn type_tag(&self) -> Option<TypeTag> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(TypeTag::Bool),
            Self::Int(_) => Some(TypeTag::Int),
            Self::Float(_) => Some(TypeTag::Float),
            Self::Text(_) => Some(TypeTag::Text),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_fits_every_tag() {
        for tag in [
            TypeTag::Any,
            TypeTag::Bool,
            TypeTag::Int,
            TypeTag::Float,
            TypeTag::Text,
        ] {
            assert!(tag.accepts(&Value::Null), "{tag} should accept null");
        }
    }

    #[test]
    fn tags_reject_other_types() {
        assert!(TypeTag::Int.accepts(&Value::from(30)));
        assert!(!TypeTag::Int.accepts(&Value::from("30")));
        assert!(!TypeTag::Text.accepts(&Value::from(1.5)));
        assert!(TypeTag::Any.accepts(&Value::from(true)));
    }

    #[test]
    fn conversions_and_accessors() {
        assert_eq!(Value::from(7_i32).as_int(), Some(7));
        assert_eq!(Value::from("Ada").as_text(), Some("Ada"));
        assert_eq!(Value::from(false).as_bool(), Some(false));
        assert_eq!(Value::from("x").as_int(), None);
        assert!(Value::default().is_null());
    }

    #[test]
    fn display_is_plain() {
        assert_eq!(Value::from(31).to_string(), "31");
        assert_eq!(Value::from("Ada").to_string(), "Ada");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(TypeTag::Float.to_string(), "float");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_untagged_round_trip() {
        let json = serde_json::to_string(&Value::from(42)).expect("serialize");
        assert_eq!(json, "42");
        let back: Value = serde_json::from_str("\"Ada\"").expect("deserialize");
        assert_eq!(back, Value::from("Ada"));
        let tag: TypeTag = serde_json::from_str("\"text\"").expect("deserialize tag");
        assert_eq!(tag, TypeTag::Text);
    }
}
