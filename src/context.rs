// ABOUTME: Rule-wide configuration: symbol resolution, defaults, regex flags, and per-thread scratch

use crate::ast::SymbolScope;
use crate::builtins::Builtins;
use crate::datetime::Tz;
use crate::errors::{EvaluationError, SyntaxError};
use crate::suggestions::suggest_symbol;
use crate::types::DataType;
use crate::value::Value;
use regex::{Regex, RegexBuilder};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// A host-supplied symbol resolver: `(thing, name) -> value`.
pub type Resolver = dyn Fn(&Value, &str) -> Result<Value, EvaluationError> + Send + Sync;

/// A host-supplied type resolver used for parse-time checking: `name -> type`.
pub type TypeResolver = dyn Fn(&str) -> Result<DataType, EvaluationError> + Send + Sync;

// ============================================================================
// Per-thread evaluation scratch
// ============================================================================

// Rules are immutable and may be evaluated from many threads at once, so the
// mutable evaluation state (comprehension bindings and the last regex match)
// is keyed by thread rather than stored on the context.
thread_local! {
    static REGEX_GROUPS: RefCell<Option<Vec<Value>>> = const { RefCell::new(None) };
    static SCOPES: RefCell<Vec<(String, Value)>> = const { RefCell::new(Vec::new()) };
}

/// Pops the comprehension binding frame it guards when dropped, so frames
/// unwind on evaluation failures too.
pub struct ScopeGuard {
    _private: (),
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            scopes.borrow_mut().pop();
        });
    }
}

/// The default resolver: treat *thing* as a mapping and look the symbol up
/// by key.
pub fn resolve_item(thing: &Value, name: &str) -> Result<Value, EvaluationError> {
    let entries = match thing {
        Value::Mapping(entries) => entries,
        _ => return Err(EvaluationError::symbol_resolution(name, None)),
    };
    for (key, value) in entries {
        if matches!(key, Value::String(k) if k == name) {
            return Ok(value.clone());
        }
    }
    let candidates = entries.iter().filter_map(|(key, _)| match key {
        Value::String(k) => Some(k.as_str()),
        _ => None,
    });
    Err(EvaluationError::SymbolResolution {
        name: name.to_string(),
        scope: None,
        suggestion: suggest_symbol(name, candidates),
    })
}

/// An alternative resolver that treats dots in the symbol name as nested
/// lookups, so `address.city` traverses mappings within mappings.
pub fn resolve_attribute(thing: &Value, name: &str) -> Result<Value, EvaluationError> {
    let mut current = thing.clone();
    for part in name.split('.') {
        current = resolve_item(&current, part)?;
    }
    Ok(current)
}

/// Build a type resolver from a map of symbol names to their declared types.
/// Unknown names fail resolution, which surfaces as a parse-time error.
pub fn type_resolver_from_map(
    types: HashMap<String, DataType>,
) -> impl Fn(&str) -> Result<DataType, EvaluationError> + Send + Sync {
    move |name| {
        types.get(name).cloned().ok_or_else(|| {
            let candidates = types.keys().map(String::as_str);
            EvaluationError::SymbolResolution {
                name: name.to_string(),
                scope: None,
                suggestion: suggest_symbol(name, candidates),
            }
        })
    }
}

/// Flags applied when fuzzy-comparison patterns are compiled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

/// An object defining the context for a rule's evaluation. This can be used
/// to change how symbols are resolved, the default timezone for naive
/// datetimes, the regex flags, and the value substituted for failed
/// resolutions.
pub struct Context {
    pub regex_flags: RegexFlags,
    pub default_timezone: Tz,
    resolver: Arc<Resolver>,
    type_resolver: Option<Arc<TypeResolver>>,
    default_value: Option<Value>,
    builtins: Builtins,
}

impl Context {
    pub fn new() -> Self {
        Context {
            regex_flags: RegexFlags::default(),
            default_timezone: Tz::default(),
            resolver: Arc::new(resolve_item),
            type_resolver: None,
            default_value: None,
            builtins: Builtins::from_defaults(Tz::default()),
        }
    }

    pub fn with_regex_flags(mut self, regex_flags: RegexFlags) -> Self {
        self.regex_flags = regex_flags;
        self
    }

    /// The timezone applied to naive datetime literals and used by the
    /// `$now` and `$today` built-ins.
    pub fn with_default_timezone(mut self, timezone: Tz) -> Self {
        self.default_timezone = timezone;
        self.builtins = Builtins::from_defaults(timezone);
        self
    }

    pub fn with_resolver(
        mut self,
        resolver: impl Fn(&Value, &str) -> Result<Value, EvaluationError> + Send + Sync + 'static,
    ) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_type_resolver(
        mut self,
        type_resolver: impl Fn(&str) -> Result<DataType, EvaluationError> + Send + Sync + 'static,
    ) -> Self {
        self.type_resolver = Some(Arc::new(type_resolver));
        self
    }

    /// Declare symbol types from a map; see [`type_resolver_from_map`].
    pub fn with_type_map(self, types: HashMap<String, DataType>) -> Self {
        self.with_type_resolver(type_resolver_from_map(types))
    }

    /// The value substituted when a symbol or attribute fails to resolve.
    pub fn with_default_value(mut self, default_value: Value) -> Self {
        self.default_value = Some(default_value);
        self
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn builtins_mut(&mut self) -> &mut Builtins {
        &mut self.builtins
    }

    /// Resolve a symbol against *thing*. Host-scoped symbols check the
    /// innermost comprehension binding first, then fall through to the
    /// resolver; built-in symbols consult the `$` namespace.
    pub fn resolve(
        &self,
        thing: &Value,
        name: &str,
        scope: SymbolScope,
    ) -> Result<Value, EvaluationError> {
        match scope {
            SymbolScope::Builtin => self.builtins.resolve(self, name),
            SymbolScope::Host => {
                if let Some(value) = self.scope_lookup(name) {
                    return Ok(value);
                }
                match (self.resolver)(thing, name) {
                    Ok(value) => Ok(value),
                    Err(error @ EvaluationError::SymbolResolution { .. }) => {
                        match &self.default_value {
                            Some(default) => Ok(default.clone()),
                            None => Err(error),
                        }
                    }
                    Err(other) => Err(other),
                }
            }
        }
    }

    /// Resolve an attribute of an already-evaluated value, reusing the
    /// symbol resolver and reporting failures as attribute errors.
    pub fn resolve_attribute(&self, object: &Value, name: &str) -> Result<Value, EvaluationError> {
        match (self.resolver)(object, name) {
            Ok(value) => Ok(value),
            Err(EvaluationError::SymbolResolution { suggestion, .. }) => {
                if let Some(default) = &self.default_value {
                    return Ok(default.clone());
                }
                Err(EvaluationError::AttributeResolution {
                    name: name.to_string(),
                    suggestion,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// The declared type for a symbol, used while the rule is being parsed.
    pub fn resolve_type(&self, name: &str) -> Result<DataType, EvaluationError> {
        match &self.type_resolver {
            Some(type_resolver) => type_resolver(name),
            None => Ok(DataType::Undefined),
        }
    }

    /// Compile a fuzzy-comparison pattern with this context's flags. Match
    /// (as opposed to search) operators anchor the pattern at the start of
    /// the subject.
    pub fn compile_regex(&self, pattern: &str, anchored: bool) -> Result<Regex, SyntaxError> {
        let source = if anchored {
            format!(r"\A(?:{pattern})")
        } else {
            pattern.to_string()
        };
        RegexBuilder::new(&source)
            .case_insensitive(self.regex_flags.case_insensitive)
            .multi_line(self.regex_flags.multi_line)
            .dot_matches_new_line(self.regex_flags.dot_matches_new_line)
            .build()
            .map_err(|source| SyntaxError::Regex {
                value: pattern.to_string(),
                source,
            })
    }

    /// Record the capture groups of a successful match as this thread's
    /// `$re_groups` value.
    pub fn store_regex_groups(&self, captures: &regex::Captures<'_>) {
        let groups: Vec<Value> = (1..captures.len())
            .map(|i| match captures.get(i) {
                Some(group) => Value::String(group.as_str().to_string()),
                None => Value::Null,
            })
            .collect();
        REGEX_GROUPS.with(|slot| *slot.borrow_mut() = Some(groups));
    }

    /// Clear this thread's `$re_groups` after a failed match.
    pub fn clear_regex_groups(&self) {
        REGEX_GROUPS.with(|slot| *slot.borrow_mut() = None);
    }

    pub fn regex_groups(&self) -> Option<Vec<Value>> {
        REGEX_GROUPS.with(|slot| slot.borrow().clone())
    }

    /// Push a comprehension binding frame for this thread. The returned
    /// guard pops the frame when dropped.
    #[must_use]
    pub fn push_scope(&self, name: String, value: Value) -> ScopeGuard {
        SCOPES.with(|scopes| scopes.borrow_mut().push((name, value)));
        ScopeGuard { _private: () }
    }

    fn scope_lookup(&self, name: &str) -> Option<Value> {
        SCOPES.with(|scopes| {
            scopes
                .borrow()
                .iter()
                .rev()
                .find(|(bound, _)| bound == name)
                .map(|(_, value)| value.clone())
        })
    }

    #[cfg(test)]
    pub(crate) fn scope_depth(&self) -> usize {
        SCOPES.with(|scopes| scopes.borrow().len())
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("regex_flags", &self.regex_flags)
            .field("default_timezone", &self.default_timezone)
            .field("default_value", &self.default_value)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_item_suggests_close_names() {
        let thing = Value::from(json!({"name": "Alice", "age": 21}));
        let err = resolve_item(&thing, "nmae").unwrap_err();
        match err {
            EvaluationError::SymbolResolution { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("name"));
            }
            other => panic!("expected a symbol resolution error, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_attribute_traverses_dotted_names() {
        let thing = Value::from(json!({"address": {"city": "Berlin"}}));
        let value = resolve_attribute(&thing, "address.city").unwrap();
        assert_eq!(value, Value::from("Berlin"));
    }

    #[test]
    fn test_default_value_substitutes_missing_symbols() {
        let context = Context::new().with_default_value(Value::Null);
        let thing = Value::from(json!({}));
        let value = context
            .resolve(&thing, "missing", SymbolScope::Host)
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_scope_shadows_resolver() {
        let context = Context::new();
        let thing = Value::from(json!({"v": 1}));
        let _guard = context.push_scope("v".to_string(), Value::from(99i64));
        let value = context.resolve(&thing, "v", SymbolScope::Host).unwrap();
        assert_eq!(value, Value::from(99i64));
        drop(_guard);
        let value = context.resolve(&thing, "v", SymbolScope::Host).unwrap();
        assert_eq!(value, Value::from(1i64));
    }

    #[test]
    fn test_type_resolver_from_map_rejects_unknown_names() {
        let mut types = HashMap::new();
        types.insert("age".to_string(), DataType::Float);
        let resolver = type_resolver_from_map(types);
        assert_eq!(resolver("age").unwrap(), DataType::Float);
        assert!(resolver("aeg").is_err());
    }

    #[test]
    fn test_compile_regex_applies_flags() {
        let context = Context::new().with_regex_flags(RegexFlags {
            case_insensitive: true,
            ..RegexFlags::default()
        });
        let regex = context.compile_regex("alice", false).unwrap();
        assert!(regex.is_match("ALICE"));
    }

    #[test]
    fn test_anchored_compilation() {
        let context = Context::new();
        let anchored = context.compile_regex("lic", true).unwrap();
        assert!(!anchored.is_match("Alice"));
        let search = context.compile_regex("lic", false).unwrap();
        assert!(search.is_match("Alice"));
    }
}
