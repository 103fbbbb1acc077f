use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The string a null value unboxes to.
pub const NULL_STRING: &str = "nullValue";

/// The shared null value. Every null slot in a history refers to this one instance.
pub static NULL_VALUE: StateValue = StateValue::Null;

/// Discriminant of a [`StateValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateValueType {
    Null,
    Int,
    Long,
    Double,
    String,
}

impl StateValueType {
    /// Tag used when a value is written to a history file.
    pub const fn disk_tag(self) -> i8 {
        match self {
            StateValueType::Null => -1,
            StateValueType::Int => 0,
            StateValueType::String => 1,
            StateValueType::Long => 2,
            StateValueType::Double => 3,
        }
    }

    /// Inverse of [`StateValueType::disk_tag`].
    pub const fn from_disk_tag(tag: i8) -> Option<Self> {
        match tag {
            -1 => Some(StateValueType::Null),
            0 => Some(StateValueType::Int),
            1 => Some(StateValueType::String),
            2 => Some(StateValueType::Long),
            3 => Some(StateValueType::Double),
            _ => None,
        }
    }
}

impl fmt::Display for StateValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateValueType::Null => "null",
            StateValueType::Int => "int",
            StateValueType::Long => "long",
            StateValueType::Double => "double",
            StateValueType::String => "string",
        };
        f.write_str(name)
    }
}

/// Raised when a value is unboxed as a type it does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("state value of type {actual} cannot be unboxed as {requested}")]
pub struct StateValueTypeError {
    pub requested: StateValueType,
    pub actual: StateValueType,
}

/// The payload recorded for an attribute during an interval.
///
/// Values are immutable. Two values are equal when they carry the same tag and
/// the same payload; doubles compare by bit pattern so `NaN == NaN`.
///
/// ```
/// use stratum_types::StateValue;
///
/// let v = StateValue::from(42);
/// assert_eq!(v.unbox_int().unwrap(), 42);
/// assert_eq!(v.unbox_long().unwrap(), 42);
/// assert!(v.unbox_str().is_err());
///
/// assert_eq!(StateValue::null().unbox_int().unwrap(), -1);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum StateValue {
    #[default]
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    String(Arc<str>),
}

impl StateValue {
    /// The shared null value.
    #[inline]
    pub fn null() -> &'static StateValue {
        &NULL_VALUE
    }

    pub fn string(value: impl Into<Arc<str>>) -> Self {
        StateValue::String(value.into())
    }

    pub fn value_type(&self) -> StateValueType {
        match self {
            StateValue::Null => StateValueType::Null,
            StateValue::Int(_) => StateValueType::Int,
            StateValue::Long(_) => StateValueType::Long,
            StateValue::Double(_) => StateValueType::Double,
            StateValue::String(_) => StateValueType::String,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    fn mismatch(&self, requested: StateValueType) -> StateValueTypeError {
        StateValueTypeError {
            requested,
            actual: self.value_type(),
        }
    }

    /// Null unboxes to `-1`.
    pub fn unbox_int(&self) -> Result<i32, StateValueTypeError> {
        match self {
            StateValue::Int(v) => Ok(*v),
            StateValue::Null => Ok(-1),
            _ => Err(self.mismatch(StateValueType::Int)),
        }
    }

    /// Ints widen to long. Null unboxes to `-1`.
    pub fn unbox_long(&self) -> Result<i64, StateValueTypeError> {
        match self {
            StateValue::Long(v) => Ok(*v),
            StateValue::Int(v) => Ok(i64::from(*v)),
            StateValue::Null => Ok(-1),
            _ => Err(self.mismatch(StateValueType::Long)),
        }
    }

    /// Null unboxes to `NaN`.
    pub fn unbox_double(&self) -> Result<f64, StateValueTypeError> {
        match self {
            StateValue::Double(v) => Ok(*v),
            StateValue::Null => Ok(f64::NAN),
            _ => Err(self.mismatch(StateValueType::Double)),
        }
    }

    /// Null unboxes to [`NULL_STRING`].
    pub fn unbox_str(&self) -> Result<&str, StateValueTypeError> {
        match self {
            StateValue::String(v) => Ok(v),
            StateValue::Null => Ok(NULL_STRING),
            _ => Err(self.mismatch(StateValueType::String)),
        }
    }
}

impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StateValue::Null, StateValue::Null) => true,
            (StateValue::Int(a), StateValue::Int(b)) => a == b,
            (StateValue::Long(a), StateValue::Long(b)) => a == b,
            (StateValue::Double(a), StateValue::Double(b)) => a.to_bits() == b.to_bits(),
            (StateValue::String(a), StateValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for StateValue {}

impl std::hash::Hash for StateValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value_type().hash(state);
        match self {
            StateValue::Null => {}
            StateValue::Int(v) => v.hash(state),
            StateValue::Long(v) => v.hash(state),
            StateValue::Double(v) => v.to_bits().hash(state),
            StateValue::String(v) => v.hash(state),
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => f.write_str(NULL_STRING),
            StateValue::Int(v) => write!(f, "{}", v),
            StateValue::Long(v) => write!(f, "{}", v),
            StateValue::Double(v) => write!(f, "{}", v),
            StateValue::String(v) => f.write_str(v),
        }
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Int(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Long(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Double(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::String(Arc::from(value))
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::String(Arc::from(value))
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(StateValue::Null, Into::into)
    }
}
