// ABOUTME: Runtime values, host-data coercion, truthiness, and structural equality

use crate::errors::EvaluationError;
use crate::float::Float;
use crate::types::{common_member_type, DataType, FunctionType};
use chrono::{DateTime, FixedOffset, TimeDelta};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

/// The callback type for host-supplied functions.
pub type FunctionHandler = dyn Fn(&[Value]) -> Result<Value, EvaluationError> + Send + Sync;

/// A callable host value together with its declared signature. The signature
/// drives parse-time checking of calls and runtime validation of argument
/// and return values.
#[derive(Clone)]
pub struct FunctionValue {
    pub name: String,
    pub signature: FunctionType,
    handler: Arc<FunctionHandler>,
}

impl FunctionValue {
    pub fn new(
        name: impl Into<String>,
        signature: FunctionType,
        handler: impl Fn(&[Value]) -> Result<Value, EvaluationError> + Send + Sync + 'static,
    ) -> Self {
        FunctionValue {
            name: name.into(),
            signature,
            handler: Arc::new(handler),
        }
    }

    fn error(&self, message: impl Into<String>) -> EvaluationError {
        EvaluationError::function_call(self.name.clone(), message)
    }

    /// Invoke the function, enforcing the declared signature. Errors raised
    /// by the host callback are wrapped so the function name is preserved.
    pub fn invoke(&self, arguments: &[Value]) -> Result<Value, EvaluationError> {
        if let Some(argument_types) = &self.signature.argument_types {
            let minimum = self
                .signature
                .minimum_arguments
                .unwrap_or(argument_types.len());
            if arguments.len() < minimum || arguments.len() > argument_types.len() {
                return Err(self.error(format!(
                    "expected {} to {} arguments, got {}",
                    minimum,
                    argument_types.len(),
                    arguments.len()
                )));
            }
            for (position, (argument, declared)) in
                arguments.iter().zip(argument_types.iter()).enumerate()
            {
                if !argument.data_type().is_compatible(declared) {
                    return Err(self.error(format!(
                        "argument {} is {}, expected {}",
                        position,
                        argument.data_type(),
                        declared
                    )));
                }
            }
        } else if let Some(minimum) = self.signature.minimum_arguments {
            if arguments.len() < minimum {
                return Err(self.error(format!(
                    "expected at least {} arguments, got {}",
                    minimum,
                    arguments.len()
                )));
            }
        }
        let result = (self.handler)(arguments).map_err(|inner| EvaluationError::FunctionCall {
            function: self.name.clone(),
            message: inner.to_string(),
            source: Some(Box::new(inner)),
        })?;
        if !result
            .data_type()
            .is_compatible(&self.signature.return_type)
        {
            return Err(self.error(format!(
                "returned {}, expected {}",
                result.data_type(),
                self.signature.return_type
            )));
        }
        Ok(result)
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionValue")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A value of one of the engine data types. Host data is converted into this
/// representation at the resolver boundary; everything inside the evaluator
/// operates on it exclusively.
#[derive(Debug, Clone)]
pub enum Value {
    Boolean(bool),
    Bytes(Vec<u8>),
    Datetime(DateTime<FixedOffset>),
    Float(Float),
    Null,
    String(String),
    Timedelta(TimeDelta),
    Array(Vec<Value>),
    Set(Vec<Value>),
    Mapping(Vec<(Value, Value)>),
    Function(FunctionValue),
}

impl Value {
    /// Build a SET, discarding duplicate members.
    pub fn set_of(members: impl IntoIterator<Item = Value>) -> Value {
        let mut unique: Vec<Value> = Vec::new();
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }
        Value::Set(unique)
    }

    /// Build a MAPPING. A repeated key replaces the earlier entry.
    pub fn mapping_of(entries: impl IntoIterator<Item = (Value, Value)>) -> Value {
        let mut unique: Vec<(Value, Value)> = Vec::new();
        for (key, value) in entries {
            if let Some(existing) = unique.iter_mut().find(|(k, _)| *k == key) {
                existing.1 = value;
            } else {
                unique.push((key, value));
            }
        }
        Value::Mapping(unique)
    }

    /// The engine data type of this value, with compound member types
    /// inferred from the members themselves.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::Bytes(_) => DataType::Bytes,
            Value::Datetime(_) => DataType::Datetime,
            Value::Float(_) => DataType::Float,
            Value::Null => DataType::Null,
            Value::String(_) => DataType::String,
            Value::Timedelta(_) => DataType::Timedelta,
            Value::Array(members) => {
                let member_types: Vec<DataType> = members.iter().map(Value::data_type).collect();
                DataType::array_of(common_member_type(member_types.iter()))
            }
            Value::Set(members) => {
                let member_types: Vec<DataType> = members.iter().map(Value::data_type).collect();
                DataType::set_of(common_member_type(member_types.iter()))
            }
            Value::Mapping(entries) => {
                let key_types: Vec<DataType> =
                    entries.iter().map(|(k, _)| k.data_type()).collect();
                let value_types: Vec<DataType> =
                    entries.iter().map(|(_, v)| v.data_type()).collect();
                DataType::mapping_of(
                    common_member_type(key_types.iter()),
                    common_member_type(value_types.iter()),
                )
            }
            Value::Function(function) => DataType::Function(Box::new(function.signature.clone())),
        }
    }

    /// Truthiness as used by the logic operators and `matches`: false, zero,
    /// empty strings/bytes/containers, a zero timedelta, and null are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Bytes(b) => !b.is_empty(),
            Value::Datetime(_) => true,
            Value::Float(f) => !f.is_zero(),
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Timedelta(d) => *d != TimeDelta::zero(),
            Value::Array(members) => !members.is_empty(),
            Value::Set(members) => !members.is_empty(),
            Value::Mapping(entries) => !entries.is_empty(),
            Value::Function(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Membership as tested by the `in` operator: substring for strings,
    /// member for arrays and sets, key for mappings.
    pub fn contains(&self, member: &Value) -> Result<bool, EvaluationError> {
        match self {
            Value::String(s) => match member {
                Value::String(needle) => Ok(s.contains(needle.as_str())),
                _ => Err(EvaluationError::TypeMismatch),
            },
            Value::Array(members) | Value::Set(members) => Ok(members.contains(member)),
            Value::Mapping(entries) => Ok(entries.iter().any(|(key, _)| key == member)),
            _ => Err(EvaluationError::TypeMismatch),
        }
    }

    /// The members yielded by iterating this value, or `None` when the value
    /// is not iterable. Mappings yield their keys; strings their characters.
    pub fn iterable_members(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(members) | Value::Set(members) => Some(members.clone()),
            Value::Mapping(entries) => Some(entries.iter().map(|(key, _)| key.clone()).collect()),
            Value::String(s) => Some(s.chars().map(|c| Value::String(c.to_string())).collect()),
            _ => None,
        }
    }

    /// Coerce any serializable host object into an engine value via its JSON
    /// shape.
    pub fn from_serialize<T: serde::Serialize>(thing: &T) -> Result<Value, EvaluationError> {
        serde_json::to_value(thing)
            .map(Value::from)
            .map_err(|_| EvaluationError::TypeMismatch)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Boolean(left), Value::Boolean(right)) => left == right,
            (Value::Bytes(left), Value::Bytes(right)) => left == right,
            (Value::Datetime(left), Value::Datetime(right)) => left == right,
            (Value::Float(left), Value::Float(right)) => left == right,
            (Value::Null, Value::Null) => true,
            (Value::String(left), Value::String(right)) => left == right,
            (Value::Timedelta(left), Value::Timedelta(right)) => left == right,
            (Value::Array(left), Value::Array(right)) => left == right,
            // set and mapping equality is content based, not order based
            (Value::Set(left), Value::Set(right)) => {
                left.len() == right.len() && left.iter().all(|member| right.contains(member))
            }
            (Value::Mapping(left), Value::Mapping(right)) => {
                left.len() == right.len()
                    && left
                        .iter()
                        .all(|(key, value)| right.iter().any(|(k, v)| k == key && v == value))
            }
            (Value::Function(left), Value::Function(right)) => {
                left.name == right.name && Arc::ptr_eq(&left.handler, &right.handler)
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Float> for Value {
    fn from(value: Float) -> Self {
        Value::Float(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Float(Float::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Float(Float::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Float(Float::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        // saturate values beyond the decimal range instead of failing
        let float = Float::try_from(value).unwrap_or(if value.is_sign_negative() {
            Float::NegInfinity
        } else {
            Float::PosInfinity
        });
        Value::Float(float)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::Datetime(value)
    }
}

impl From<TimeDelta> for Value {
    fn from(value: TimeDelta) -> Self {
        Value::Timedelta(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Array(values.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Value::from(int)
                } else if let Some(int) = number.as_u64() {
                    Value::from(int)
                } else {
                    Value::from(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(members) => {
                Value::Array(members.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::mapping_of(
                entries
                    .into_iter()
                    .map(|(key, value)| (Value::String(key), Value::from(value))),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Bytes(bytes) => {
                write!(f, "b'")?;
                for byte in bytes {
                    write!(f, "\\x{byte:02x}")?;
                }
                write!(f, "'")
            }
            Value::Datetime(dt) => write!(f, "d'{}'", dt.to_rfc3339()),
            Value::Float(float) => write!(f, "{float}"),
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Timedelta(delta) => {
                write!(f, "t'{}'", crate::datetime::format_timedelta(delta))
            }
            Value::Array(members) => {
                write!(f, "[")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, "]")
            }
            Value::Set(members) => {
                write!(f, "{{")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, "}}")
            }
            Value::Mapping(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Function(function) => write!(f, "<function {}>", function.name),
        }
    }
}
