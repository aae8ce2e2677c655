// ABOUTME: The Rule facade: compile once, evaluate many times

use crate::ast::Statement;
use crate::context::Context;
use crate::errors::EngineError;
use crate::parser;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// A rule compiled from a textual logical expression. The rule is immutable
/// once built and can be evaluated against any number of things, from any
/// number of threads.
#[derive(Debug)]
pub struct Rule {
    text: String,
    context: Arc<Context>,
    statement: Statement,
}

impl Rule {
    /// Compile *text* with a default context. Fails on grammar errors, bad
    /// literals, and type conflicts detectable at parse time.
    pub fn new(text: &str) -> Result<Self, EngineError> {
        Rule::with_context(text, Arc::new(Context::new()))
    }

    /// Compile *text* against a specific context. Sharing one context
    /// (through the `Arc`) between rules shares its resolver configuration
    /// and built-in namespace.
    pub fn with_context(text: &str, context: Arc<Context>) -> Result<Self, EngineError> {
        let statement = parser::parse(text, &context)?;
        Ok(Rule {
            text: text.to_string(),
            context,
            statement,
        })
    }

    /// Whether *text* is a syntactically correct rule with no detectable
    /// type conflicts.
    pub fn is_valid(text: &str) -> bool {
        Rule::new(text).is_ok()
    }

    pub fn is_valid_with_context(text: &str, context: Arc<Context>) -> bool {
        Rule::with_context(text, context).is_ok()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The comment trailing the rule text, when one was written.
    pub fn comment(&self) -> Option<&str> {
        self.statement.comment.as_deref()
    }

    /// Evaluate the rule against *thing* and return the typed result.
    pub fn evaluate(&self, thing: &Value) -> Result<Value, EngineError> {
        self.statement.evaluate(&self.context, thing)
    }

    /// Whether the rule matches *thing*: the truthiness of [`evaluate`].
    ///
    /// [`evaluate`]: Rule::evaluate
    pub fn matches(&self, thing: &Value) -> Result<bool, EngineError> {
        Ok(self.evaluate(thing)?.is_truthy())
    }

    /// Lazily yield the members of *things* which match. Members that fail
    /// to evaluate yield the error in their place, so iteration can either
    /// propagate or skip it.
    pub fn filter<'a, I>(&'a self, things: I) -> impl Iterator<Item = Result<Value, EngineError>> + 'a
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: 'a,
    {
        things.into_iter().filter_map(move |thing| {
            match self.matches(&thing) {
                Ok(true) => Some(Ok(thing)),
                Ok(false) => None,
                Err(error) => Some(Err(error)),
            }
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_and_match() {
        let rule = Rule::new("age >= 21").unwrap();
        assert!(rule.matches(&json!({"age": 30}).into()).unwrap());
        assert!(!rule.matches(&json!({"age": 18}).into()).unwrap());
    }

    #[test]
    fn test_is_valid() {
        assert!(Rule::is_valid("age >= 21"));
        assert!(!Rule::is_valid("age >="));
        assert!(!Rule::is_valid("1 + 'x'"));
    }

    #[test]
    fn test_filter_yields_matching_things() {
        let rule = Rule::new("age >= 21").unwrap();
        let things: Vec<Value> = vec![
            json!({"age": 30, "name": "a"}).into(),
            json!({"age": 18, "name": "b"}).into(),
            json!({"age": 44, "name": "c"}).into(),
        ];
        let matched: Vec<Value> = rule.filter(things).map(Result::unwrap).collect();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_filter_surfaces_evaluation_errors() {
        let rule = Rule::new("age >= 21").unwrap();
        let things: Vec<Value> = vec![json!({"name": "no age"}).into()];
        let results: Vec<Result<Value, EngineError>> = rule.filter(things).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_display_is_the_rule_text() {
        let rule = Rule::new("age >= 21").unwrap();
        assert_eq!(rule.to_string(), "age >= 21");
    }
}
