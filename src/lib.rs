// ABOUTME: Library module wiring the engine components together

//! An embeddable rule/expression language. Rule text is compiled once into a
//! typed, constant-folded AST and then evaluated repeatedly against host
//! data supplied through a resolver.
//!
//! ```
//! use sifter::{Rule, Value};
//! use serde_json::json;
//!
//! let rule = Rule::new("age >= 21 and name =~~ 'Ali'").unwrap();
//! let thing: Value = json!({"age": 21, "name": "Alice"}).into();
//! assert!(rule.matches(&thing).unwrap());
//! ```

pub mod ast;
pub mod builtins;
pub mod context;
pub mod datetime;
pub mod errors;
pub mod float;
pub mod lexer;
pub mod parser;
pub mod suggestions;
pub mod types;
pub mod value;

mod engine;

pub use context::{resolve_attribute, resolve_item, Context, RegexFlags};
pub use datetime::Tz;
pub use engine::Rule;
pub use errors::{EngineError, EvaluationError, SyntaxError};
pub use float::Float;
pub use types::{DataType, FunctionType};
pub use value::{FunctionValue, Value};
