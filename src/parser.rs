// ABOUTME: Two-phase rule parser: precedence parse to deferred nodes, then typed AST construction

use crate::ast::{
    ArithmeticOp, BitwiseOp, ComparisonOp, Expression, FuzzyOp, LogicOp, OrderOp, Statement,
    SymbolScope, UnaryOp,
};
use crate::context::Context;
use crate::datetime::{parse_datetime, parse_timedelta};
use crate::errors::{EngineError, SyntaxError};
use crate::float::Float;
use crate::lexer::{unescape, Lexer, Token, TokenKind};
use crate::types::DataType;
use crate::value::Value;

// ============================================================================
// Phase 1: deferred nodes
// ============================================================================

/// A parse-tree node recording a target AST variant and its children, built
/// without any type checking. Realising these into typed [`Expression`]
/// nodes is deferred until the whole text has parsed, so grammar errors
/// always surface before type or value errors.
#[derive(Debug, Clone)]
enum Deferred {
    Boolean(bool),
    Float(String),
    FloatSpecial(Float),
    Str(String),
    Bytes(Vec<u8>),
    Datetime(String),
    Timedelta(String),
    Null,
    Array(Vec<Deferred>),
    Set(Vec<Deferred>),
    Mapping(Vec<(Deferred, Deferred)>),
    Symbol {
        name: String,
        builtin: bool,
    },
    GetAttribute {
        object: Box<Deferred>,
        name: String,
        safe: bool,
    },
    GetItem {
        container: Box<Deferred>,
        item: Box<Deferred>,
        safe: bool,
    },
    GetSlice {
        container: Box<Deferred>,
        start: Option<Box<Deferred>>,
        stop: Option<Box<Deferred>>,
        safe: bool,
    },
    Call {
        function: Box<Deferred>,
        arguments: Vec<Deferred>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Deferred>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Deferred>,
        right: Box<Deferred>,
    },
    Bitwise {
        op: BitwiseOp,
        left: Box<Deferred>,
        right: Box<Deferred>,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<Deferred>,
        right: Box<Deferred>,
    },
    ArithmeticComparison {
        op: OrderOp,
        left: Box<Deferred>,
        right: Box<Deferred>,
    },
    FuzzyComparison {
        op: FuzzyOp,
        left: Box<Deferred>,
        right: Box<Deferred>,
    },
    Logic {
        op: LogicOp,
        left: Box<Deferred>,
        right: Box<Deferred>,
    },
    Contains {
        member: Box<Deferred>,
        container: Box<Deferred>,
    },
    Ternary {
        condition: Box<Deferred>,
        case_true: Box<Deferred>,
        case_false: Box<Deferred>,
    },
    Comprehension {
        result: Box<Deferred>,
        variable: String,
        iterable: Box<Deferred>,
        condition: Option<Box<Deferred>>,
    },
}

/// Infix operators with their left binding power. Right binding power is
/// one higher for left-associative operators and equal for right-associative
/// ones; comparisons are non-associative and chaining them is rejected.
#[derive(Clone, Copy)]
enum Infix {
    Logic(LogicOp),
    Bitwise(BitwiseOp),
    Ternary,
    Comparison(ComparisonOp),
    ArithmeticComparison(OrderOp),
    Fuzzy(FuzzyOp),
    In { negated: bool },
    Arithmetic(ArithmeticOp),
}

const COMPARISON_BP: u8 = 15;
const POSTFIX_BP: u8 = 27;

struct TokenStream {
    tokens: Vec<Token>,
    index: usize,
}

impl TokenStream {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.index + offset).map(|token| &token.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn syntax_error(&self) -> SyntaxError {
        match self.peek() {
            Some(token) => SyntaxError::rule(
                format!("unexpected token {}", token.kind.describe()),
                Some(token.position),
            ),
            None => SyntaxError::rule("unexpected end of input", None),
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), SyntaxError> {
        if self.peek_kind() == Some(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.syntax_error())
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_expression(&mut self, min_bp: u8) -> Result<Deferred, SyntaxError> {
        let mut left = self.parse_prefix()?;
        let mut chained_comparison = false;
        loop {
            let Some(kind) = self.peek_kind() else { break };

            // postfix operators bind tightest of all
            let is_postfix = matches!(
                kind,
                TokenKind::Attribute
                    | TokenKind::AttributeSafe
                    | TokenKind::LeftBracket
                    | TokenKind::LeftBracketSafe
                    | TokenKind::LeftParen
            );
            if is_postfix {
                if POSTFIX_BP < min_bp {
                    break;
                }
                left = self.parse_postfix(left)?;
                continue;
            }

            let (l_bp, infix) = match kind {
                TokenKind::Or => (1, Infix::Logic(LogicOp::Or)),
                TokenKind::And => (3, Infix::Logic(LogicOp::And)),
                TokenKind::BitwiseOr => (7, Infix::Bitwise(BitwiseOp::Or)),
                TokenKind::BitwiseXor => (9, Infix::Bitwise(BitwiseOp::Xor)),
                TokenKind::BitwiseAnd => (11, Infix::Bitwise(BitwiseOp::And)),
                TokenKind::Question => (13, Infix::Ternary),
                TokenKind::Eq => (COMPARISON_BP, Infix::Comparison(ComparisonOp::Eq)),
                TokenKind::Ne => (COMPARISON_BP, Infix::Comparison(ComparisonOp::Ne)),
                TokenKind::EqFuzzyMatch => (COMPARISON_BP, Infix::Fuzzy(FuzzyOp::EqMatch)),
                TokenKind::EqFuzzySearch => (COMPARISON_BP, Infix::Fuzzy(FuzzyOp::EqSearch)),
                TokenKind::NeFuzzyMatch => (COMPARISON_BP, Infix::Fuzzy(FuzzyOp::NeMatch)),
                TokenKind::NeFuzzySearch => (COMPARISON_BP, Infix::Fuzzy(FuzzyOp::NeSearch)),
                TokenKind::Lt => (COMPARISON_BP, Infix::ArithmeticComparison(OrderOp::Lt)),
                TokenKind::Le => (COMPARISON_BP, Infix::ArithmeticComparison(OrderOp::Le)),
                TokenKind::Gt => (COMPARISON_BP, Infix::ArithmeticComparison(OrderOp::Gt)),
                TokenKind::Ge => (COMPARISON_BP, Infix::ArithmeticComparison(OrderOp::Ge)),
                TokenKind::In => (COMPARISON_BP, Infix::In { negated: false }),
                TokenKind::Not if self.peek_kind_at(1) == Some(&TokenKind::In) => {
                    (COMPARISON_BP, Infix::In { negated: true })
                }
                TokenKind::Add => (17, Infix::Arithmetic(ArithmeticOp::Add)),
                TokenKind::Sub => (17, Infix::Arithmetic(ArithmeticOp::Sub)),
                TokenKind::BitwiseShiftLeft => (19, Infix::Bitwise(BitwiseOp::ShiftLeft)),
                TokenKind::BitwiseShiftRight => (19, Infix::Bitwise(BitwiseOp::ShiftRight)),
                TokenKind::Mul => (21, Infix::Arithmetic(ArithmeticOp::Mul)),
                TokenKind::TrueDiv => (21, Infix::Arithmetic(ArithmeticOp::TrueDiv)),
                TokenKind::FloorDiv => (21, Infix::Arithmetic(ArithmeticOp::FloorDiv)),
                TokenKind::Mod => (21, Infix::Arithmetic(ArithmeticOp::Mod)),
                TokenKind::Pow => (23, Infix::Arithmetic(ArithmeticOp::Pow)),
                _ => break,
            };
            if l_bp < min_bp {
                break;
            }
            if l_bp == COMPARISON_BP {
                // comparisons are non-associative
                if chained_comparison {
                    return Err(self.syntax_error());
                }
                chained_comparison = true;
            }
            self.advance();
            left = match infix {
                Infix::Ternary => {
                    let case_true = self.parse_expression(0)?;
                    self.expect(&TokenKind::Colon)?;
                    // right associative: parse the alternative at the same
                    // binding power
                    let case_false = self.parse_expression(13)?;
                    Deferred::Ternary {
                        condition: Box::new(left),
                        case_true: Box::new(case_true),
                        case_false: Box::new(case_false),
                    }
                }
                Infix::In { negated } => {
                    if negated {
                        // the IN after NOT
                        self.advance();
                    }
                    let container = self.parse_expression(COMPARISON_BP + 1)?;
                    let contains = Deferred::Contains {
                        member: Box::new(left),
                        container: Box::new(container),
                    };
                    if negated {
                        Deferred::Unary {
                            op: UnaryOp::Not,
                            operand: Box::new(contains),
                        }
                    } else {
                        contains
                    }
                }
                other => {
                    let right = self.parse_expression(l_bp + 1)?;
                    let right = Box::new(right);
                    let left = Box::new(left);
                    match other {
                        Infix::Logic(op) => Deferred::Logic { op, left, right },
                        Infix::Bitwise(op) => Deferred::Bitwise { op, left, right },
                        Infix::Comparison(op) => Deferred::Comparison { op, left, right },
                        Infix::ArithmeticComparison(op) => {
                            Deferred::ArithmeticComparison { op, left, right }
                        }
                        Infix::Fuzzy(op) => Deferred::FuzzyComparison { op, left, right },
                        Infix::Arithmetic(op) => Deferred::Arithmetic { op, left, right },
                        Infix::Ternary | Infix::In { .. } => unreachable!("handled above"),
                    }
                }
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Deferred, SyntaxError> {
        let Some(token) = self.peek() else {
            return Err(self.syntax_error());
        };
        let position = token.position;
        let kind = token.kind.clone();
        match kind {
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_expression(6)?;
                Ok(Deferred::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Sub => {
                self.advance();
                let operand = self.parse_expression(26)?;
                Ok(Deferred::Unary {
                    op: UnaryOp::Uminus,
                    operand: Box::new(operand),
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Deferred::Boolean(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Deferred::Boolean(false))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Deferred::Null)
            }
            TokenKind::Inf => {
                self.advance();
                Ok(Deferred::FloatSpecial(Float::PosInfinity))
            }
            TokenKind::Nan => {
                self.advance();
                Ok(Deferred::FloatSpecial(Float::NaN))
            }
            TokenKind::Float(raw) => {
                self.advance();
                Ok(Deferred::Float(raw))
            }
            TokenKind::String(raw) => {
                self.advance();
                let unescaped = unescape(&raw).map_err(|_| SyntaxError::String {
                    value: raw.clone(),
                })?;
                Ok(Deferred::Str(unescaped))
            }
            TokenKind::Bytes(raw) => {
                self.advance();
                let error = || SyntaxError::Bytes { value: raw.clone() };
                let unescaped = unescape(&raw).map_err(|_| error())?;
                let mut bytes = Vec::with_capacity(unescaped.len());
                for c in unescaped.chars() {
                    bytes.push(u8::try_from(c as u32).map_err(|_| error())?);
                }
                Ok(Deferred::Bytes(bytes))
            }
            TokenKind::Datetime(raw) => {
                self.advance();
                Ok(Deferred::Datetime(raw))
            }
            TokenKind::Timedelta(raw) => {
                self.advance();
                Ok(Deferred::Timedelta(raw))
            }
            TokenKind::Symbol(name) => {
                self.advance();
                match name.strip_prefix('$') {
                    Some(stripped) => Ok(Deferred::Symbol {
                        name: stripped.to_string(),
                        builtin: true,
                    }),
                    None => Ok(Deferred::Symbol {
                        name,
                        builtin: false,
                    }),
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression(0)?;
                self.expect(&TokenKind::RightParen)?;
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                self.advance();
                self.parse_array_or_comprehension()
            }
            TokenKind::LeftBrace => {
                self.advance();
                self.parse_set_or_mapping()
            }
            _ => Err(SyntaxError::rule(
                format!("unexpected token {}", kind.describe()),
                Some(position),
            )),
        }
    }

    fn parse_postfix(&mut self, object: Deferred) -> Result<Deferred, SyntaxError> {
        let kind = self.peek_kind().cloned().expect("caller peeked");
        self.advance();
        match kind {
            TokenKind::Attribute | TokenKind::AttributeSafe => {
                let name = match self.peek_kind() {
                    Some(TokenKind::Symbol(name)) => name.clone(),
                    _ => return Err(self.syntax_error()),
                };
                self.advance();
                Ok(Deferred::GetAttribute {
                    object: Box::new(object),
                    name,
                    safe: kind == TokenKind::AttributeSafe,
                })
            }
            TokenKind::LeftBracket | TokenKind::LeftBracketSafe => {
                let safe = kind == TokenKind::LeftBracketSafe;
                if self.eat(&TokenKind::Colon) {
                    let stop = if self.peek_kind() == Some(&TokenKind::RightBracket) {
                        None
                    } else {
                        Some(Box::new(self.parse_expression(0)?))
                    };
                    self.expect(&TokenKind::RightBracket)?;
                    return Ok(Deferred::GetSlice {
                        container: Box::new(object),
                        start: None,
                        stop,
                        safe,
                    });
                }
                let first = self.parse_expression(0)?;
                if self.eat(&TokenKind::Colon) {
                    let stop = if self.peek_kind() == Some(&TokenKind::RightBracket) {
                        None
                    } else {
                        Some(Box::new(self.parse_expression(0)?))
                    };
                    self.expect(&TokenKind::RightBracket)?;
                    Ok(Deferred::GetSlice {
                        container: Box::new(object),
                        start: Some(Box::new(first)),
                        stop,
                        safe,
                    })
                } else {
                    self.expect(&TokenKind::RightBracket)?;
                    Ok(Deferred::GetItem {
                        container: Box::new(object),
                        item: Box::new(first),
                        safe,
                    })
                }
            }
            TokenKind::LeftParen => {
                let mut arguments = Vec::new();
                if !self.eat(&TokenKind::RightParen) {
                    loop {
                        arguments.push(self.parse_expression(0)?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RightParen)?;
                }
                Ok(Deferred::Call {
                    function: Box::new(object),
                    arguments,
                })
            }
            _ => unreachable!("caller matched a postfix token"),
        }
    }

    fn parse_array_or_comprehension(&mut self) -> Result<Deferred, SyntaxError> {
        if self.eat(&TokenKind::RightBracket) {
            return Ok(Deferred::Array(Vec::new()));
        }
        let first = self.parse_expression(0)?;
        if self.eat(&TokenKind::For) {
            let variable = match self.peek_kind() {
                Some(TokenKind::Symbol(name)) if !name.starts_with('$') => name.clone(),
                _ => return Err(self.syntax_error()),
            };
            self.advance();
            self.expect(&TokenKind::In)?;
            let iterable = self.parse_expression(0)?;
            let condition = if self.eat(&TokenKind::If) {
                Some(Box::new(self.parse_expression(0)?))
            } else {
                None
            };
            self.expect(&TokenKind::RightBracket)?;
            return Ok(Deferred::Comprehension {
                result: Box::new(first),
                variable,
                iterable: Box::new(iterable),
                condition,
            });
        }
        let members = self.parse_member_tail(first, &TokenKind::RightBracket)?;
        Ok(Deferred::Array(members))
    }

    fn parse_set_or_mapping(&mut self) -> Result<Deferred, SyntaxError> {
        // {} is an empty mapping
        if self.eat(&TokenKind::RightBrace) {
            return Ok(Deferred::Mapping(Vec::new()));
        }
        let first = self.parse_expression(0)?;
        if self.eat(&TokenKind::Colon) {
            let value = self.parse_expression(0)?;
            let mut entries = vec![(first, value)];
            while self.eat(&TokenKind::Comma) {
                if self.peek_kind() == Some(&TokenKind::RightBrace) {
                    break;
                }
                let key = self.parse_expression(0)?;
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expression(0)?;
                entries.push((key, value));
            }
            self.expect(&TokenKind::RightBrace)?;
            return Ok(Deferred::Mapping(entries));
        }
        let members = self.parse_member_tail(first, &TokenKind::RightBrace)?;
        Ok(Deferred::Set(members))
    }

    /// Parse the remainder of a comma-separated member list, allowing a
    /// trailing comma before *closing*.
    fn parse_member_tail(
        &mut self,
        first: Deferred,
        closing: &TokenKind,
    ) -> Result<Vec<Deferred>, SyntaxError> {
        let mut members = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.peek_kind() == Some(closing) {
                break;
            }
            members.push(self.parse_expression(0)?);
        }
        self.expect(closing)?;
        Ok(members)
    }
}

// ============================================================================
// Phase 2: realising deferred nodes into the typed AST
// ============================================================================

struct Builder<'a> {
    context: &'a Context,
    /// Comprehension variables in scope at the node being built. These
    /// shadow the host namespace and carry no declared type.
    locals: Vec<String>,
}

impl Builder<'_> {
    fn build(&mut self, node: Deferred) -> Result<Expression, EngineError> {
        let context = self.context;
        match node {
            Deferred::Boolean(value) => Ok(Expression::Literal(Value::Boolean(value))),
            Deferred::Float(raw) => {
                let float = Float::parse(&raw)?;
                Ok(Expression::Literal(Value::Float(float)))
            }
            Deferred::FloatSpecial(float) => Ok(Expression::Literal(Value::Float(float))),
            Deferred::Str(value) => Ok(Expression::Literal(Value::String(value))),
            Deferred::Bytes(value) => Ok(Expression::Literal(Value::Bytes(value))),
            Deferred::Datetime(raw) => {
                let datetime = parse_datetime(&raw, context.default_timezone)?;
                Ok(Expression::Literal(Value::Datetime(datetime)))
            }
            Deferred::Timedelta(raw) => {
                let timedelta = parse_timedelta(&raw)?;
                Ok(Expression::Literal(Value::Timedelta(timedelta)))
            }
            Deferred::Null => Ok(Expression::Literal(Value::Null)),
            Deferred::Array(members) => {
                let members = self.build_all(members)?;
                Expression::array(context, members)
            }
            Deferred::Set(members) => {
                let members = self.build_all(members)?;
                Expression::set(context, members)
            }
            Deferred::Mapping(entries) => {
                let mut built = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    built.push((self.build(key)?, self.build(value)?));
                }
                Expression::mapping(context, built)
            }
            Deferred::Symbol { name, builtin } => {
                let (scope, result_type) = if builtin {
                    (SymbolScope::Builtin, context.builtins().resolve_type(&name))
                } else if self.locals.contains(&name) {
                    (SymbolScope::Host, DataType::Undefined)
                } else {
                    (SymbolScope::Host, context.resolve_type(&name)?)
                };
                Ok(Expression::Symbol {
                    name,
                    scope,
                    result_type,
                })
            }
            Deferred::GetAttribute { object, name, safe } => {
                let object = self.build(*object)?;
                Ok(Expression::get_attribute(object, name, safe))
            }
            Deferred::GetItem {
                container,
                item,
                safe,
            } => {
                let container = self.build(*container)?;
                let item = self.build(*item)?;
                Expression::get_item(context, container, item, safe)
            }
            Deferred::GetSlice {
                container,
                start,
                stop,
                safe,
            } => {
                let container = self.build(*container)?;
                let start = start.map(|bound| self.build(*bound)).transpose()?;
                let stop = stop.map(|bound| self.build(*bound)).transpose()?;
                Expression::get_slice(context, container, start, stop, safe)
            }
            Deferred::Call {
                function,
                arguments,
            } => {
                let function = self.build(*function)?;
                let arguments = self.build_all(arguments)?;
                Expression::call(function, arguments)
            }
            Deferred::Unary { op, operand } => {
                let operand = self.build(*operand)?;
                Expression::unary(context, op, operand)
            }
            Deferred::Arithmetic { op, left, right } => {
                let left = self.build(*left)?;
                let right = self.build(*right)?;
                Expression::arithmetic(context, op, left, right)
            }
            Deferred::Bitwise { op, left, right } => {
                let left = self.build(*left)?;
                let right = self.build(*right)?;
                Expression::bitwise(context, op, left, right)
            }
            Deferred::Comparison { op, left, right } => {
                let left = self.build(*left)?;
                let right = self.build(*right)?;
                Expression::comparison(context, op, left, right)
            }
            Deferred::ArithmeticComparison { op, left, right } => {
                let left = self.build(*left)?;
                let right = self.build(*right)?;
                Expression::arithmetic_comparison(context, op, left, right)
            }
            Deferred::FuzzyComparison { op, left, right } => {
                let left = self.build(*left)?;
                let right = self.build(*right)?;
                Expression::fuzzy_comparison(context, op, left, right)
            }
            Deferred::Logic { op, left, right } => {
                let left = self.build(*left)?;
                let right = self.build(*right)?;
                Expression::logic(context, op, left, right)
            }
            Deferred::Contains { member, container } => {
                let member = self.build(*member)?;
                let container = self.build(*container)?;
                Expression::contains(context, member, container)
            }
            Deferred::Ternary {
                condition,
                case_true,
                case_false,
            } => {
                let condition = self.build(*condition)?;
                let case_true = self.build(*case_true)?;
                let case_false = self.build(*case_false)?;
                Expression::ternary(condition, case_true, case_false)
            }
            Deferred::Comprehension {
                result,
                variable,
                iterable,
                condition,
            } => {
                let iterable = self.build(*iterable)?;
                self.locals.push(variable.clone());
                let built = (|| {
                    let result = self.build(*result)?;
                    let condition = condition.map(|c| self.build(*c)).transpose()?;
                    Ok::<_, EngineError>((result, condition))
                })();
                self.locals.pop();
                let (result, condition) = built?;
                Ok(Expression::Comprehension {
                    result: Box::new(result),
                    variable,
                    iterable: Box::new(iterable),
                    condition: condition.map(Box::new),
                })
            }
        }
    }

    fn build_all(&mut self, nodes: Vec<Deferred>) -> Result<Vec<Expression>, EngineError> {
        nodes.into_iter().map(|node| self.build(node)).collect()
    }
}

/// Parse rule text into a typed, reduced statement. Phase one parses the
/// grammar into deferred nodes; phase two realises them, running type checks
/// and constant folding against the given context.
pub fn parse(text: &str, context: &Context) -> Result<Statement, EngineError> {
    let tokens = Lexer::new(text).tokenize()?;
    let mut stream = TokenStream { tokens, index: 0 };
    if stream.peek().is_none() {
        return Err(SyntaxError::rule("unexpected end of input", None).into());
    }
    let deferred = stream.parse_expression(0)?;
    let comment = match stream.peek_kind() {
        Some(TokenKind::Comment(comment)) => {
            let comment = comment.trim().to_string();
            stream.advance();
            Some(comment)
        }
        _ => None,
    };
    if stream.peek().is_some() {
        return Err(stream.syntax_error().into());
    }
    let mut builder = Builder {
        context,
        locals: Vec::new(),
    };
    let expression = builder.build(deferred)?;
    Ok(Statement {
        expression,
        comment,
    })
}
