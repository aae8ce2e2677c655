// ABOUTME: Tests for sharing compiled rules across threads

use serde_json::json;
use serial_test::serial;
use sifter::{Rule, Value};
use std::sync::Arc;
use std::thread;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn test_rule_is_send_and_sync() {
    assert_send_sync::<Rule>();
    assert_send_sync::<sifter::Context>();
}

#[test]
fn test_concurrent_evaluation_of_a_shared_rule() {
    let rule = Arc::new(Rule::new("n % 2 == 0 and n in numbers").unwrap());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let rule = rule.clone();
            thread::spawn(move || {
                for n in 0..100i64 {
                    let thing: Value = json!({"n": n, "numbers": [n]}).into();
                    let expected = n % 2 == 0;
                    assert_eq!(rule.matches(&thing).unwrap(), expected, "thread {i}, n {n}");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
#[serial]
fn test_regex_groups_are_per_thread() {
    let matcher = Arc::new(Rule::new("name =~ '(\\w+)'").unwrap());
    let reader = Arc::new(Rule::new("$re_groups[0]").unwrap());

    let handles: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|word| {
            let matcher = matcher.clone();
            let reader = reader.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let thing: Value = json!({"name": word}).into();
                    assert!(matcher.matches(&thing).unwrap());
                    // the group seen on this thread is always its own word
                    let group = reader.evaluate(&Value::Null).unwrap();
                    assert_eq!(group, Value::from(word));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_concurrent_comprehensions_do_not_interfere() {
    let rule = Arc::new(Rule::new("$sum([n * n for n in numbers]) == total").unwrap());
    let handles: Vec<_> = (1..5i64)
        .map(|scale| {
            let rule = rule.clone();
            thread::spawn(move || {
                let numbers: Vec<i64> = (0..20).map(|n| n * scale).collect();
                let total: i64 = numbers.iter().map(|n| n * n).sum();
                let thing: Value = json!({"numbers": numbers, "total": total}).into();
                for _ in 0..25 {
                    assert!(rule.matches(&thing).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
