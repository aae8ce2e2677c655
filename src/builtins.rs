//! The `$` built-in namespace.
//!
//! Supplies math constants, clock values, the per-thread `$re_groups`
//! scratch, and a set of typed functions:
//!
//! - `$any(seq)` / `$all(seq)` - truthiness over array members
//! - `$sum(seq)` - decimal sum of an array of numbers
//! - `$map(fn, seq)` / `$filter(fn, seq)` - apply a function value over an array
//! - `$parse_datetime(str)` / `$parse_timedelta(str)` - literal parsers exposed
//!   to rule text
//!
//! Every function carries its full signature so calls are checked while the
//! rule is being parsed.

use crate::context::Context;
use crate::datetime::{parse_datetime, parse_timedelta, Tz};
use crate::errors::EvaluationError;
use crate::float::Float;
use crate::suggestions::suggest_symbol;
use crate::types::{DataType, FunctionType};
use crate::value::{FunctionValue, Value};
use std::collections::HashMap;

enum BuiltinValue {
    Constant(Value),
    /// Produced fresh on every resolution, e.g. `$now`.
    Generator(fn(&Context) -> Result<Value, EvaluationError>),
}

struct BuiltinEntry {
    value: BuiltinValue,
    value_type: DataType,
}

/// The namespace addressed by the `$` symbol prefix. Shared by every rule
/// compiled against the same context and immutable once the context is in
/// use.
pub struct Builtins {
    entries: HashMap<String, BuiltinEntry>,
}

impl Builtins {
    /// Build the default namespace. The timezone is captured by
    /// `$parse_datetime`; `$now` and `$today` read it from the context at
    /// resolution time.
    pub fn from_defaults(timezone: Tz) -> Self {
        let mut builtins = Builtins {
            entries: HashMap::new(),
        };
        builtins.insert_constant("pi", Value::Float(Float::PI));
        builtins.insert_constant("e", Value::Float(Float::E));
        builtins.insert_generator("now", DataType::Datetime, |context| {
            Ok(Value::Datetime(context.default_timezone.now()))
        });
        builtins.insert_generator("today", DataType::Datetime, |context| {
            Ok(Value::Datetime(context.default_timezone.today()))
        });
        builtins.insert_generator("re_groups", DataType::Undefined, |context| {
            Ok(match context.regex_groups() {
                Some(groups) => Value::Array(groups),
                None => Value::Null,
            })
        });
        for function in default_functions(timezone) {
            let name = function.name.clone();
            builtins.insert_constant(&name, Value::Function(function));
        }
        builtins
    }

    fn insert_constant(&mut self, name: &str, value: Value) {
        let value_type = value.data_type();
        self.entries.insert(
            name.to_string(),
            BuiltinEntry {
                value: BuiltinValue::Constant(value),
                value_type,
            },
        );
    }

    fn insert_generator(
        &mut self,
        name: &str,
        value_type: DataType,
        generator: fn(&Context) -> Result<Value, EvaluationError>,
    ) {
        self.entries.insert(
            name.to_string(),
            BuiltinEntry {
                value: BuiltinValue::Generator(generator),
                value_type,
            },
        );
    }

    /// Add or replace a named value, e.g. to expose host constants or host
    /// functions as `$name`.
    pub fn add_value(&mut self, name: impl Into<String>, value: Value) {
        self.insert_constant(&name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// The declared type of a built-in, `Undefined` for unknown names. Used
    /// for parse-time checking of `$`-scoped symbols.
    pub fn resolve_type(&self, name: &str) -> DataType {
        self.entries
            .get(name)
            .map(|entry| entry.value_type.clone())
            .unwrap_or(DataType::Undefined)
    }

    pub fn resolve(&self, context: &Context, name: &str) -> Result<Value, EvaluationError> {
        let entry =
            self.entries
                .get(name)
                .ok_or_else(|| EvaluationError::SymbolResolution {
                    name: name.to_string(),
                    scope: Some("built-in".to_string()),
                    suggestion: suggest_symbol(name, self.names()),
                })?;
        match &entry.value {
            BuiltinValue::Constant(value) => Ok(value.clone()),
            BuiltinValue::Generator(generator) => generator(context),
        }
    }
}

// ============================================================================
// Typed built-in functions
// ============================================================================

fn array_argument(value: &Value) -> Result<&[Value], EvaluationError> {
    match value {
        Value::Array(members) => Ok(members),
        _ => Err(EvaluationError::TypeMismatch),
    }
}

fn function_argument(value: &Value) -> Result<&FunctionValue, EvaluationError> {
    match value {
        Value::Function(function) => Ok(function),
        _ => Err(EvaluationError::TypeMismatch),
    }
}

fn builtin_any(args: &[Value]) -> Result<Value, EvaluationError> {
    let members = array_argument(&args[0])?;
    Ok(Value::Boolean(members.iter().any(Value::is_truthy)))
}

fn builtin_all(args: &[Value]) -> Result<Value, EvaluationError> {
    let members = array_argument(&args[0])?;
    Ok(Value::Boolean(members.iter().all(Value::is_truthy)))
}

fn builtin_sum(args: &[Value]) -> Result<Value, EvaluationError> {
    let members = array_argument(&args[0])?;
    let mut total = Float::zero();
    for member in members {
        match member {
            Value::Float(f) => total = total.add(f)?,
            _ => return Err(EvaluationError::TypeMismatch),
        }
    }
    Ok(Value::Float(total))
}

fn builtin_map(args: &[Value]) -> Result<Value, EvaluationError> {
    let function = function_argument(&args[0])?;
    let members = array_argument(&args[1])?;
    let mut mapped = Vec::with_capacity(members.len());
    for member in members {
        mapped.push(function.invoke(std::slice::from_ref(member))?);
    }
    Ok(Value::Array(mapped))
}

fn builtin_filter(args: &[Value]) -> Result<Value, EvaluationError> {
    let function = function_argument(&args[0])?;
    let members = array_argument(&args[1])?;
    let mut kept = Vec::new();
    for member in members {
        if function.invoke(std::slice::from_ref(member))?.is_truthy() {
            kept.push(member.clone());
        }
    }
    Ok(Value::Array(kept))
}

fn default_functions(timezone: Tz) -> Vec<FunctionValue> {
    vec![
        FunctionValue::new(
            "any",
            FunctionType::new(DataType::Boolean, vec![DataType::array()]),
            builtin_any,
        ),
        FunctionValue::new(
            "all",
            FunctionType::new(DataType::Boolean, vec![DataType::array()]),
            builtin_all,
        ),
        FunctionValue::new(
            "sum",
            FunctionType::new(DataType::Float, vec![DataType::array()]),
            builtin_sum,
        ),
        FunctionValue::new(
            "map",
            FunctionType::new(
                DataType::array(),
                vec![DataType::function(), DataType::array()],
            ),
            builtin_map,
        ),
        FunctionValue::new(
            "filter",
            FunctionType::new(
                DataType::array(),
                vec![DataType::function(), DataType::array()],
            ),
            builtin_filter,
        ),
        FunctionValue::new(
            "parse_datetime",
            FunctionType::new(DataType::Datetime, vec![DataType::String]),
            move |args| match &args[0] {
                Value::String(s) => parse_datetime(s, timezone)
                    .map(Value::Datetime)
                    .map_err(|err| {
                        EvaluationError::function_call("parse_datetime", err.to_string())
                    }),
                _ => Err(EvaluationError::TypeMismatch),
            },
        ),
        FunctionValue::new(
            "parse_timedelta",
            FunctionType::new(DataType::Timedelta, vec![DataType::String]),
            |args| match &args[0] {
                Value::String(s) => parse_timedelta(s).map(Value::Timedelta).map_err(|err| {
                    EvaluationError::function_call("parse_timedelta", err.to_string())
                }),
                _ => Err(EvaluationError::TypeMismatch),
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Builtins {
        Builtins::from_defaults(Tz::Utc)
    }

    fn call(name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
        let context = Context::new();
        match defaults().resolve(&context, name).unwrap() {
            Value::Function(function) => function.invoke(args),
            other => panic!("{name} is not a function: {other}"),
        }
    }

    #[test]
    fn test_builtin_functions_have_declared_minimums() {
        let builtins = defaults();
        for name in ["any", "all", "sum", "map", "filter"] {
            match builtins.resolve_type(name) {
                DataType::Function(signature) => {
                    assert!(signature.minimum_arguments.is_some(), "{name}")
                }
                other => panic!("{name} should be a function, got {other}"),
            }
        }
    }

    #[test]
    fn test_any_and_all() {
        let truthy_tail = Value::from(vec![0i64, 1, 2]);
        assert_eq!(
            call("any", &[truthy_tail.clone()]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(call("all", &[truthy_tail]).unwrap(), Value::Boolean(false));

        let empty = Value::Array(vec![]);
        assert_eq!(call("any", &[empty.clone()]).unwrap(), Value::Boolean(false));
        assert_eq!(call("all", &[empty]).unwrap(), Value::Boolean(true));

        let nulls = Value::Array(vec![Value::Null]);
        assert_eq!(call("any", &[nulls]).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_sum() {
        let numbers = Value::from(vec![1i64, 2, 3, 4]);
        assert_eq!(call("sum", &[numbers]).unwrap(), Value::from(10i64));

        let mixed = Value::Array(vec![Value::from(1i64), Value::from("x")]);
        assert!(call("sum", &[mixed]).is_err());
    }

    #[test]
    fn test_map_and_filter() {
        let double = Value::Function(FunctionValue::new(
            "double",
            FunctionType::new(DataType::Float, vec![DataType::Float]),
            |args| match &args[0] {
                Value::Float(f) => f.add(f).map(Value::Float),
                _ => Err(EvaluationError::TypeMismatch),
            },
        ));
        let numbers = Value::from(vec![1i64, 2, 3]);
        assert_eq!(
            call("map", &[double, numbers.clone()]).unwrap(),
            Value::from(vec![2i64, 4, 6])
        );

        let odd = Value::Function(FunctionValue::new(
            "odd",
            FunctionType::new(DataType::Boolean, vec![DataType::Float]),
            |args| match &args[0] {
                Value::Float(f) => Ok(Value::Boolean(
                    f.as_i64().is_some_and(|v| v.rem_euclid(2) == 1),
                )),
                _ => Err(EvaluationError::TypeMismatch),
            },
        ));
        assert_eq!(
            call("filter", &[odd, numbers]).unwrap(),
            Value::from(vec![1i64, 3])
        );
    }

    #[test]
    fn test_parse_functions() {
        let parsed = call("parse_datetime", &[Value::from("2019-09-23")]).unwrap();
        assert!(matches!(parsed, Value::Datetime(_)));
        assert!(call("parse_datetime", &[Value::from("bogus")]).is_err());

        let parsed = call("parse_timedelta", &[Value::from("PT4H")]).unwrap();
        assert!(matches!(parsed, Value::Timedelta(_)));
        assert!(call("parse_timedelta", &[Value::from("4 hours")]).is_err());
    }

    #[test]
    fn test_unknown_builtin_suggests_a_name() {
        let context = Context::new();
        let err = defaults().resolve(&context, "nwo").unwrap_err();
        match err {
            EvaluationError::SymbolResolution {
                scope, suggestion, ..
            } => {
                assert_eq!(scope.as_deref(), Some("built-in"));
                assert_eq!(suggestion.as_deref(), Some("now"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_constants() {
        let context = Context::new();
        let pi = defaults().resolve(&context, "pi").unwrap();
        assert_eq!(pi, Value::Float(Float::PI));
        assert_eq!(defaults().resolve_type("pi"), DataType::Float);
    }
}
