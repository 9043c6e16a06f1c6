// src/value.rs - Property value system
use crate::error::{BacError, Result};
use crate::types::{
    BinaryPv, EventState, EventTransitionBits, LimitEnable, NotifyType, ObjectIdentifier, Reliability,
    StatusFlags, TimeStamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Core value type stored in a [`PropertyStore`](crate::PropertyStore)
///
/// Primitive variants cover what points carry as present values; the
/// constructed variants carry the reporting bookkeeping properties.
///
/// # Examples
///
/// ```rust
/// use bacevent::{BinaryPv, Value};
///
/// let real = Value::Real(21.5);
/// assert_eq!(real.as_real(), Some(21.5));
///
/// // Inactive values select the minimum off time in a lockout
/// assert!(Value::Binary(BinaryPv::Inactive).is_inactive());
/// assert!(!Value::Real(1.0).is_inactive());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Value {
    /// Empty slot / relinquish
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    CharacterString(String),
    Enumerated(u32),
    Binary(BinaryPv),
    EventState(EventState),
    Reliability(Reliability),
    StatusFlags(StatusFlags),
    TransitionBits(EventTransitionBits),
    LimitEnable(LimitEnable),
    NotifyType(NotifyType),
    TimeStamps([TimeStamp; 3]),
    Texts([String; 3]),
    ObjectId(ObjectIdentifier),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view used by analog algorithms
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(f64::from(*f)),
            Value::Double(d) => Some(*d),
            Value::Unsigned(u) => Some(f64::from(*u)),
            Value::Signed(i) => Some(f64::from(*i)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Binary(pv) => Some(*pv == BinaryPv::Active),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u32> {
        match self {
            Value::Unsigned(u) | Value::Enumerated(u) => Some(*u),
            _ => None,
        }
    }

    /// Whether this value counts as "off" for minimum on/off timing
    pub fn is_inactive(&self) -> bool {
        matches!(self, Value::Binary(BinaryPv::Inactive) | Value::Boolean(false))
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Unsigned(_) => "unsigned",
            Value::Signed(_) => "signed",
            Value::Real(_) => "real",
            Value::Double(_) => "double",
            Value::CharacterString(_) => "character-string",
            Value::Enumerated(_) => "enumerated",
            Value::Binary(_) => "binary-pv",
            Value::EventState(_) => "event-state",
            Value::Reliability(_) => "reliability",
            Value::StatusFlags(_) => "status-flags",
            Value::TransitionBits(_) => "event-transition-bits",
            Value::LimitEnable(_) => "limit-enable",
            Value::NotifyType(_) => "notify-type",
            Value::TimeStamps(_) => "time-stamps",
            Value::Texts(_) => "texts",
            Value::ObjectId(_) => "object-identifier",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Unsigned(u) | Value::Enumerated(u) => write!(f, "{}", u),
            Value::Signed(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Double(d) => write!(f, "{}", d),
            Value::CharacterString(s) => f.write_str(s),
            Value::EventState(state) => write!(f, "{}", state),
            Value::ObjectId(id) => write!(f, "{}", id),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            other => write!(f, "{:?}", other),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

macro_rules! value_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl TryFrom<Value> for $ty {
                type Error = BacError;

                fn try_from(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(BacError::TypeMismatch {
                            expected: stringify!($variant),
                            actual: other.type_name(),
                        }),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    Boolean => bool,
    Unsigned => u32,
    Signed => i32,
    Real => f32,
    Double => f64,
    CharacterString => String,
    Binary => BinaryPv,
    EventState => EventState,
    Reliability => Reliability,
    StatusFlags => StatusFlags,
    TransitionBits => EventTransitionBits,
    LimitEnable => LimitEnable,
    NotifyType => NotifyType,
    TimeStamps => [TimeStamp; 3],
    Texts => [String; 3],
    ObjectId => ObjectIdentifier,
    List => Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Real(3.5).as_real(), Some(3.5));
        assert_eq!(Value::Unsigned(7).as_real(), Some(7.0));
        assert_eq!(Value::Boolean(true).as_real(), None);

        assert_eq!(Value::Binary(BinaryPv::Active).as_bool(), Some(true));
        assert_eq!(Value::Enumerated(3).as_unsigned(), Some(3));

        let state: EventState = Value::EventState(EventState::LowLimit).try_into().unwrap();
        assert_eq!(state, EventState::LowLimit);
    }

    #[test]
    fn test_value_type_mismatch() {
        let err = bool::try_from(Value::Real(1.0)).unwrap_err();
        assert!(matches!(
            err,
            BacError::TypeMismatch { expected: "Boolean", actual: "real" }
        ));
    }

    #[test]
    fn test_inactive_detection() {
        assert!(Value::Binary(BinaryPv::Inactive).is_inactive());
        assert!(Value::Boolean(false).is_inactive());
        assert!(!Value::Binary(BinaryPv::Active).is_inactive());
        assert!(!Value::Null.is_inactive());
    }

    #[test]
    fn test_value_serde_shape() {
        let json = serde_json::to_string(&Value::Real(1.5)).unwrap();
        assert_eq!(json, r#"{"type":"real","value":1.5}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Real(1.5));
    }
}
