// ABOUTME: Error types for rule compilation and evaluation failures

use crate::types::DataType;
use thiserror::Error;

/// Line/column position of a token within the rule text, used for syntax
/// diagnostics. Columns are zero-indexed byte offsets within the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}:{}", self.line, self.column)
    }
}

fn position_label(position: &Option<Position>) -> String {
    match position {
        Some(position) => position.to_string(),
        None => "EOF".to_string(),
    }
}

/// Errors raised while turning rule text into an abstract syntax tree.
#[derive(Error, Debug, Clone)]
pub enum SyntaxError {
    /// The rule text does not conform to the grammar.
    #[error("syntax error ({message}) at: {}", position_label(.position))]
    Rule {
        message: String,
        position: Option<Position>,
    },

    /// An improperly formatted string literal.
    #[error("invalid string literal: {value:?}")]
    String { value: String },

    /// An improperly formatted bytes literal.
    #[error("invalid bytes literal: {value:?}")]
    Bytes { value: String },

    /// An improperly formatted float literal.
    #[error("invalid float literal ({message}): {value:?}")]
    Float { message: String, value: String },

    /// An improperly formatted datetime literal.
    #[error("invalid datetime literal: {value:?}")]
    Datetime { value: String },

    /// An improperly formatted timedelta literal.
    #[error("invalid timedelta literal ({message}): {value:?}")]
    Timedelta { message: String, value: String },

    /// A regular expression that failed to compile, carrying the underlying
    /// error which includes the offending position within the pattern.
    #[error("invalid regex: {value:?} ({source})")]
    Regex {
        value: String,
        #[source]
        source: regex::Error,
    },
}

impl SyntaxError {
    pub fn rule(message: impl Into<String>, position: Option<Position>) -> Self {
        SyntaxError::Rule {
            message: message.into(),
            position,
        }
    }
}

/// Errors raised while an expression is being evaluated. These can occur at
/// parse time as well, while nodes are evaluated during the reduction phase.
#[derive(Error, Debug, Clone)]
pub enum EvaluationError {
    /// An operand or resolved value has a type the operation does not support.
    #[error("data type mismatch")]
    TypeMismatch,

    /// An attribute could not be resolved to a value.
    #[error("unknown attribute: {name:?}")]
    AttributeResolution {
        name: String,
        suggestion: Option<String>,
    },

    /// An attribute with type information resolved to a value of another type.
    #[error("attribute {name:?} resolved to incorrect datatype (is: {is_type}, expected: {expected_type})")]
    AttributeType {
        name: String,
        is_type: DataType,
        expected_type: DataType,
    },

    /// An item or index lookup on a container failed.
    #[error("lookup operation failed")]
    Lookup,

    /// A symbol name could not be resolved to a value.
    #[error("unknown symbol: {name:?}")]
    SymbolResolution {
        name: String,
        scope: Option<String>,
        suggestion: Option<String>,
    },

    /// A symbol with type information resolved to a value of another type.
    #[error("symbol {name:?} resolved to incorrect datatype (is: {is_type}, expected: {expected_type})")]
    SymbolType {
        name: String,
        is_type: DataType,
        expected_type: DataType,
    },

    /// A function invocation failed: bad arity, incompatible argument or
    /// return types, or an error raised by the host function itself.
    #[error("function call failed ({function}: {message})")]
    FunctionCall {
        function: String,
        message: String,
        #[source]
        source: Option<Box<EvaluationError>>,
    },
}

impl EvaluationError {
    pub fn symbol_resolution(name: impl Into<String>, scope: Option<&str>) -> Self {
        EvaluationError::SymbolResolution {
            name: name.into(),
            scope: scope.map(str::to_string),
            suggestion: None,
        }
    }

    pub fn function_call(function: impl Into<String>, message: impl Into<String>) -> Self {
        EvaluationError::FunctionCall {
            function: function.into(),
            message: message.into(),
            source: None,
        }
    }
}

/// The top level error type from which every failure in this crate surfaces.
/// Compilation can produce either variant, because constant folding evaluates
/// reducible nodes while the rule is still being parsed.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

impl EngineError {
    /// Whether this error was produced by the grammar rather than by
    /// evaluating an expression.
    pub fn is_syntax(&self) -> bool {
        matches!(self, EngineError::Syntax(_))
    }
}
