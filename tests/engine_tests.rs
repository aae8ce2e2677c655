// ABOUTME: End-to-end tests for compiling rules and evaluating them against things

use serde_json::json;
use sifter::{Context, DataType, EngineError, EvaluationError, Rule, Tz, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn thing(value: serde_json::Value) -> Value {
    Value::from(value)
}

#[test]
fn test_conjunction_of_comparisons() {
    let rule = Rule::new("age >= 21 and name == \"Alice\"").unwrap();
    assert!(rule
        .matches(&thing(json!({"age": 21, "name": "Alice"})))
        .unwrap());
    assert!(!rule
        .matches(&thing(json!({"age": 20, "name": "Alice"})))
        .unwrap());
    assert!(!rule
        .matches(&thing(json!({"age": 21, "name": "Bob"})))
        .unwrap());
}

#[test]
fn test_fuzzy_match_on_resolved_symbol() {
    let rule = Rule::new("name =~ \".lic.\"").unwrap();
    assert!(rule.matches(&thing(json!({"name": "Alice"}))).unwrap());
    assert!(!rule.matches(&thing(json!({"name": "Bob"}))).unwrap());
}

#[test]
fn test_arithmetic_is_decimal() {
    let rule = Rule::new("1 + 2 * 3").unwrap();
    assert_eq!(rule.evaluate(&Value::Null).unwrap(), Value::from(7i64));

    // the classic binary float pitfall must not appear
    let rule = Rule::new("0.1 + 0.2 == 0.3").unwrap();
    assert!(rule.matches(&Value::Null).unwrap());
}

#[test]
fn test_ternary() {
    let rule = Rule::new("true ? \"yes\" : \"no\"").unwrap();
    assert_eq!(rule.evaluate(&Value::Null).unwrap(), Value::from("yes"));
}

#[test]
fn test_comprehension_with_guard_and_index() {
    let rule = Rule::new("[w for w in words if w =~ \"^A\"][0]").unwrap();
    let result = rule
        .evaluate(&thing(json!({"words": ["Alice", "Bob", "Ann"]})))
        .unwrap();
    assert_eq!(result, Value::from("Alice"));
}

#[test]
fn test_safe_attribute_access_on_null() {
    let rule = Rule::new("x&.y == null").unwrap();
    assert!(rule.matches(&thing(json!({"x": null}))).unwrap());

    // without the safe operator the access is an error
    let rule = Rule::new("x.y == null").unwrap();
    let err = rule.matches(&thing(json!({"x": null}))).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Evaluation(EvaluationError::AttributeResolution { .. })
    ));
}

#[test]
fn test_datetime_plus_timedelta() {
    let context = Arc::new(Context::new().with_default_timezone(Tz::Utc));
    let rule = Rule::with_context(
        "d'2022-05-23 08:23' + t'PT4H3M2S' == d'2022-05-23 12:26:02'",
        context,
    )
    .unwrap();
    assert!(rule.matches(&Value::Null).unwrap());
}

#[test]
fn test_ordering_against_incompatible_symbol_value() {
    let rule = Rule::new("symbol < 1").unwrap();
    let err = rule.matches(&thing(json!({"symbol": "x"}))).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Evaluation(EvaluationError::TypeMismatch)
    ));
}

#[test]
fn test_matches_is_truthiness_of_evaluate() {
    for (text, value) in [
        ("[]", false),
        ("[0]", true),
        ("0", false),
        ("0.0 - 0.0", false),
        ("''", false),
        ("'x'", true),
        ("null", false),
    ] {
        let rule = Rule::new(text).unwrap();
        let evaluated = rule.evaluate(&Value::Null).unwrap();
        assert_eq!(
            rule.matches(&Value::Null).unwrap(),
            evaluated.is_truthy(),
            "{text}"
        );
        assert_eq!(rule.matches(&Value::Null).unwrap(), value, "{text}");
    }
}

#[test]
fn test_short_circuit_skips_resolution() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let context = Context::new().with_resolver(move |thing, name| {
        counter.fetch_add(1, Ordering::SeqCst);
        sifter::resolve_item(thing, name)
    });
    let data = thing(json!({"flag": false}));

    let rule = Rule::with_context("flag and missing > 1", Arc::new(context)).unwrap();
    assert!(!rule.matches(&data).unwrap());
    // only `flag` may have been resolved
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_short_circuit_or() {
    let rule = Rule::new("true or missing > 1").unwrap();
    assert!(rule.matches(&thing(json!({}))).unwrap());
}

#[test]
fn test_ternary_evaluates_exactly_one_branch() {
    let rule = Rule::new("flag ? taken : missing").unwrap();
    assert_eq!(
        rule.evaluate(&thing(json!({"flag": true, "taken": 5})))
            .unwrap(),
        Value::from(5i64)
    );
}

#[test]
fn test_unknown_symbol_suggestion() {
    let rule = Rule::new("nmae == \"Alice\"").unwrap();
    let err = rule.matches(&thing(json!({"name": "Alice"}))).unwrap_err();
    match err {
        EngineError::Evaluation(EvaluationError::SymbolResolution {
            name, suggestion, ..
        }) => {
            assert_eq!(name, "nmae");
            assert_eq!(suggestion.as_deref(), Some("name"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_default_value_swallows_resolution_errors() {
    let context = Context::new().with_default_value(Value::Null);
    let rule = Rule::with_context("missing == null", Arc::new(context)).unwrap();
    assert!(rule.matches(&thing(json!({}))).unwrap());
}

#[test]
fn test_type_resolver_rejects_bad_rules_at_compile_time() {
    let mut types = HashMap::new();
    types.insert("age".to_string(), DataType::Float);
    types.insert("name".to_string(), DataType::String);
    let context = Arc::new(Context::new().with_type_map(types));

    assert!(Rule::is_valid_with_context("age >= 21", context.clone()));
    assert!(!Rule::is_valid_with_context("age =~ 'x'", context.clone()));
    assert!(!Rule::is_valid_with_context("name > 5", context.clone()));
    assert!(!Rule::is_valid_with_context("missing == 1", context.clone()));
}

#[test]
fn test_symbol_type_checked_at_evaluation_time() {
    let mut types = HashMap::new();
    types.insert("name".to_string(), DataType::String);
    let context = Arc::new(Context::new().with_type_map(types));
    let rule = Rule::with_context("name == 'Alice'", context).unwrap();

    let err = rule.matches(&thing(json!({"name": 42}))).unwrap_err();
    match err {
        EngineError::Evaluation(EvaluationError::SymbolType {
            name,
            is_type,
            expected_type,
        }) => {
            assert_eq!(name, "name");
            assert_eq!(is_type, DataType::Float);
            assert_eq!(expected_type, DataType::String);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_default_timezone_applies_to_naive_literals() {
    let offset = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
    let context = Arc::new(Context::new().with_default_timezone(Tz::Offset(offset)));
    let rule = Rule::with_context(
        "d'2020-01-01 00:00' == d'2019-12-31 22:00+00:00'",
        context,
    )
    .unwrap();
    assert!(rule.matches(&Value::Null).unwrap());
}

#[test]
fn test_regex_flags() {
    let context = Context::new().with_regex_flags(sifter::RegexFlags {
        case_insensitive: true,
        ..Default::default()
    });
    let rule = Rule::with_context("name =~ 'alice'", Arc::new(context)).unwrap();
    assert!(rule.matches(&thing(json!({"name": "ALICE"}))).unwrap());
}

#[test]
fn test_dotted_attribute_resolver() {
    let context = Context::new().with_resolver(|thing, name| sifter::resolve_attribute(thing, name));
    let rule = Rule::with_context("address.city == 'Berlin'", Arc::new(context)).unwrap();
    let data = thing(json!({"address": {"city": "Berlin"}}));
    assert!(rule.matches(&data).unwrap());
}

#[test]
fn test_attribute_access_uses_the_resolver() {
    let rule = Rule::new("user.age >= 21").unwrap();
    let data = thing(json!({"user": {"age": 30}}));
    assert!(rule.matches(&data).unwrap());

    let rule = Rule::new("user.aeg >= 21").unwrap();
    let err = rule.matches(&data).unwrap_err();
    match err {
        EngineError::Evaluation(EvaluationError::AttributeResolution {
            name, suggestion, ..
        }) => {
            assert_eq!(name, "aeg");
            assert_eq!(suggestion.as_deref(), Some("age"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_serialized_host_structs_as_things() {
    #[derive(serde::Serialize)]
    struct User {
        name: String,
        age: u32,
    }

    let user = User {
        name: "Alice".to_string(),
        age: 30,
    };
    let rule = Rule::new("age >= 21 and name == 'Alice'").unwrap();
    assert!(rule.matches(&Value::from_serialize(&user).unwrap()).unwrap());
}

#[test]
fn test_comment_is_available_on_the_rule() {
    let rule = Rule::new("age >= 21 # drinking age in the US").unwrap();
    assert_eq!(rule.comment(), Some("drinking age in the US"));
}

#[test]
fn test_compile_errors_carry_positions() {
    let err = Rule::new("age >= 21 and\nname @ 'x'").unwrap_err();
    assert!(err.to_string().contains("line 2"));
}

#[test]
fn test_null_equality() {
    let rule = Rule::new("null == null").unwrap();
    assert!(rule.matches(&Value::Null).unwrap());
}

#[test]
fn test_safe_item_access() {
    let rule = Rule::new("data&['missing'] == null").unwrap();
    assert!(rule.matches(&thing(json!({"data": {}}))).unwrap());
    assert!(rule.matches(&thing(json!({"data": null}))).unwrap());

    let rule = Rule::new("data['missing'] == null").unwrap();
    let err = rule.matches(&thing(json!({"data": {}}))).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Evaluation(EvaluationError::Lookup)
    ));
}
