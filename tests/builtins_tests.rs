// ABOUTME: Tests for the $ built-in namespace as used from rule text

use serde_json::json;
use serial_test::serial;
use sifter::{Context, DataType, EngineError, EvaluationError, FunctionType, FunctionValue, Rule, Value};
use std::sync::Arc;

fn matches(text: &str) -> bool {
    Rule::new(text).unwrap().matches(&Value::Null).unwrap()
}

#[test]
fn test_constants() {
    assert!(matches("$pi > 3.14 and $pi < 3.15"));
    assert!(matches("$e > 2.71 and $e < 2.72"));
}

#[test]
fn test_now_and_today() {
    let now = Rule::new("$now").unwrap().evaluate(&Value::Null).unwrap();
    assert!(matches!(now, Value::Datetime(_)));
    let today = Rule::new("$today").unwrap().evaluate(&Value::Null).unwrap();
    assert!(matches!(today, Value::Datetime(_)));

    // temporal arithmetic and equality work; ordering datetimes does not
    assert!(matches("$today + t'P1D' != $today"));
    assert!(matches("$today + t'PT0S' == $today"));
    let err = Rule::new("$now >= $today").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Evaluation(EvaluationError::TypeMismatch)
    ));
}

#[test]
fn test_functions_from_rule_text() {
    assert!(matches("$any([false, true])"));
    assert!(!matches("$all([true, false])"));
    assert!(matches("$sum([1, 2, 3]) == 6"));
}

#[test]
fn test_functions_over_resolved_symbols() {
    let rule = Rule::new("$sum(scores) >= 10").unwrap();
    assert!(rule.matches(&json!({"scores": [4, 6]}).into()).unwrap());
    assert!(!rule.matches(&json!({"scores": [1, 2]}).into()).unwrap());
}

#[test]
fn test_parse_datetime_builtin() {
    assert!(matches("$parse_datetime('2019-09-23') == d'2019-09-23'"));
    // calls are never folded, so the bad literal fails at evaluation time
    let rule = Rule::new("$parse_datetime('bogus')").unwrap();
    let err = rule.evaluate(&Value::Null).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Evaluation(EvaluationError::FunctionCall { .. })
    ));
}

#[test]
fn test_parse_timedelta_builtin() {
    assert!(matches("$parse_timedelta('PT4H') == t'PT4H'"));
}

#[test]
fn test_unknown_builtin() {
    let rule = Rule::new("$bogus == 1").unwrap();
    let err = rule.matches(&Value::Null).unwrap_err();
    match err {
        EngineError::Evaluation(EvaluationError::SymbolResolution { scope, .. }) => {
            assert_eq!(scope.as_deref(), Some("built-in"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_builtin_calls_are_type_checked_at_parse_time() {
    // $pi is a FLOAT, not a FUNCTION, but calling it only fails at runtime
    // because its declared type carries no signature to check against;
    // passing a bad argument type to a declared function fails at compile
    let err = Rule::new("$sum('not an array')").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Evaluation(EvaluationError::TypeMismatch)
    ));
}

#[test]
fn test_host_functions_with_map_and_filter() {
    let mut context = Context::new();
    context.builtins_mut().add_value(
        "double",
        Value::Function(FunctionValue::new(
            "double",
            FunctionType::new(DataType::Float, vec![DataType::Float]),
            |args| match &args[0] {
                Value::Float(f) => f.add(f).map(Value::Float),
                _ => Err(EvaluationError::TypeMismatch),
            },
        )),
    );
    let rule = Rule::with_context("$map($double, values)", Arc::new(context)).unwrap();
    let result = rule.evaluate(&json!({"values": [1, 2, 3]}).into()).unwrap();
    assert_eq!(result, Value::from(vec![2i64, 4, 6]));
}

#[test]
fn test_host_function_error_wrapping() {
    let mut context = Context::new();
    context.builtins_mut().add_value(
        "explode",
        Value::Function(FunctionValue::new(
            "explode",
            FunctionType::new(DataType::Float, vec![DataType::Float]),
            |_| Err(EvaluationError::function_call("explode", "internal failure")),
        )),
    );
    let rule = Rule::with_context("$explode(1)", Arc::new(context)).unwrap();
    let err = rule.evaluate(&Value::Null).unwrap_err();
    match err {
        EngineError::Evaluation(EvaluationError::FunctionCall { function, .. }) => {
            assert_eq!(function, "explode");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_return_type_validation() {
    let mut context = Context::new();
    context.builtins_mut().add_value(
        "lying",
        Value::Function(FunctionValue::new(
            "lying",
            FunctionType::new(DataType::Float, vec![]),
            |_| Ok(Value::from("not a float")),
        )),
    );
    let rule = Rule::with_context("$lying()", Arc::new(context)).unwrap();
    let err = rule.evaluate(&Value::Null).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Evaluation(EvaluationError::FunctionCall { .. })
    ));
}

#[test]
#[serial]
fn test_re_groups_after_match() {
    let rule = Rule::new("name =~ '(\\w+) (\\w+)'").unwrap();
    assert!(rule.matches(&json!({"name": "Alice Liddell"}).into()).unwrap());

    let groups = Rule::new("$re_groups").unwrap();
    assert_eq!(
        groups.evaluate(&Value::Null).unwrap(),
        Value::from(vec!["Alice", "Liddell"])
    );
}

#[test]
#[serial]
fn test_re_groups_cleared_after_failed_match() {
    let rule = Rule::new("name =~ '(\\d+)'").unwrap();
    assert!(!rule.matches(&json!({"name": "no digits"}).into()).unwrap());

    let groups = Rule::new("$re_groups == null").unwrap();
    assert!(groups.matches(&Value::Null).unwrap());
}

#[test]
#[serial]
fn test_re_groups_with_unmatched_optional_group() {
    let rule = Rule::new("name =~ '(a)(b)?'").unwrap();
    assert!(rule.matches(&json!({"name": "a"}).into()).unwrap());

    let groups = Rule::new("$re_groups == ['a', null]").unwrap();
    assert!(groups.matches(&Value::Null).unwrap());
}
