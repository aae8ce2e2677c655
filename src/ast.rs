// ABOUTME: Typed expression nodes, constant folding, and the recursive evaluator

use crate::context::Context;
use crate::errors::{EngineError, EvaluationError};
use crate::float::Float;
use crate::types::{common_member_type, DataType};
use crate::value::Value;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Uminus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// The four fuzzy operators: `=~` and `!~` anchor the pattern at the start
/// of the subject, `=~~` and `!~~` search anywhere within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzyOp {
    EqMatch,
    EqSearch,
    NeMatch,
    NeSearch,
}

impl FuzzyOp {
    pub fn is_search(&self) -> bool {
        matches!(self, FuzzyOp::EqSearch | FuzzyOp::NeSearch)
    }

    pub fn is_negated(&self) -> bool {
        matches!(self, FuzzyOp::NeMatch | FuzzyOp::NeSearch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

/// Where a symbol is resolved from: the host thing, or the `$` built-in
/// namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Host,
    Builtin,
}

/// An expression node. Nodes are immutable once constructed; the smart
/// constructors below validate operand types and constant-fold, so a node
/// that survives construction is well formed.
#[derive(Debug, Clone)]
pub enum Expression {
    /// A fully reduced value.
    Literal(Value),
    Array(Vec<Expression>),
    Set(Vec<Expression>),
    Mapping(Vec<(Expression, Expression)>),
    Symbol {
        name: String,
        scope: SymbolScope,
        result_type: DataType,
    },
    GetAttribute {
        object: Box<Expression>,
        name: String,
        safe: bool,
    },
    GetItem {
        container: Box<Expression>,
        item: Box<Expression>,
        safe: bool,
    },
    GetSlice {
        container: Box<Expression>,
        start: Option<Box<Expression>>,
        stop: Option<Box<Expression>>,
        safe: bool,
    },
    Call {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Bitwise {
        op: BitwiseOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    ArithmeticComparison {
        op: OrderOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    FuzzyComparison {
        op: FuzzyOp,
        left: Box<Expression>,
        right: Box<Expression>,
        /// Compiled eagerly when the right side is a literal pattern.
        regex: Option<Regex>,
    },
    Logic {
        op: LogicOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Contains {
        member: Box<Expression>,
        container: Box<Expression>,
    },
    Ternary {
        condition: Box<Expression>,
        case_true: Box<Expression>,
        case_false: Box<Expression>,
    },
    Comprehension {
        result: Box<Expression>,
        variable: String,
        iterable: Box<Expression>,
        condition: Option<Box<Expression>>,
    },
}

/// The types arithmetic addition and subtraction accept: plain numbers plus
/// datetime/timedelta combinations.
const TEMPORAL_ARITHMETIC_TYPES: &[DataType] =
    &[DataType::Float, DataType::Datetime, DataType::Timedelta];

fn check_operand(operand: &Expression, compatible: &[DataType]) -> Result<(), EngineError> {
    let declared = operand.result_type();
    if declared == DataType::Undefined {
        return Ok(());
    }
    if compatible.iter().any(|dt| declared.is_compatible(dt)) {
        return Ok(());
    }
    Err(EvaluationError::TypeMismatch.into())
}

fn as_real(value: &Value) -> Result<Float, EvaluationError> {
    match value {
        Value::Float(f) if f.is_real() => Ok(*f),
        _ => Err(EvaluationError::TypeMismatch),
    }
}

fn as_natural(value: &Value) -> Result<u64, EvaluationError> {
    match value {
        Value::Float(f) => f.as_u64().ok_or(EvaluationError::TypeMismatch),
        _ => Err(EvaluationError::TypeMismatch),
    }
}

/// Resolve slice bounds against a container length: negative indices count
/// from the end and out-of-range bounds clamp.
fn slice_bounds(length: usize, start: Option<i64>, stop: Option<i64>) -> (usize, usize) {
    let length = length as i64;
    let clamp = |bound: i64| -> i64 {
        if bound < 0 {
            (length + bound).max(0)
        } else {
            bound.min(length)
        }
    };
    let start = clamp(start.unwrap_or(0));
    let stop = clamp(stop.unwrap_or(length));
    (start as usize, (stop.max(start)) as usize)
}

impl Expression {
    pub fn is_literal(&self) -> bool {
        matches!(self, Expression::Literal(_))
    }

    /// The declared type of the value this node evaluates to, which may be
    /// `Undefined` when it depends on unresolved symbols.
    pub fn result_type(&self) -> DataType {
        match self {
            Expression::Literal(value) => value.data_type(),
            Expression::Array(members) => {
                let member_types: Vec<DataType> =
                    members.iter().map(Expression::result_type).collect();
                DataType::array_of(common_member_type(member_types.iter()))
            }
            Expression::Set(members) => {
                let member_types: Vec<DataType> =
                    members.iter().map(Expression::result_type).collect();
                DataType::set_of(common_member_type(member_types.iter()))
            }
            Expression::Mapping(entries) => {
                let key_types: Vec<DataType> =
                    entries.iter().map(|(k, _)| k.result_type()).collect();
                let value_types: Vec<DataType> =
                    entries.iter().map(|(_, v)| v.result_type()).collect();
                DataType::mapping_of(
                    common_member_type(key_types.iter()),
                    common_member_type(value_types.iter()),
                )
            }
            Expression::Symbol { result_type, .. } => result_type.clone(),
            Expression::GetAttribute { object, .. } => match object.result_type() {
                DataType::Mapping { value_type, .. } => *value_type,
                _ => DataType::Undefined,
            },
            Expression::GetItem { container, .. } => match container.result_type() {
                DataType::Array { value_type, .. } | DataType::Mapping { value_type, .. } => {
                    *value_type
                }
                DataType::String => DataType::String,
                _ => DataType::Undefined,
            },
            Expression::GetSlice { container, .. } => match container.result_type() {
                array @ DataType::Array { .. } => array,
                DataType::String => DataType::String,
                _ => DataType::Undefined,
            },
            Expression::Call { function, .. } => match function.result_type() {
                DataType::Function(signature) => signature.return_type,
                _ => DataType::Undefined,
            },
            Expression::Unary { op: UnaryOp::Not, .. } => DataType::Boolean,
            Expression::Unary { op: UnaryOp::Uminus, .. } => DataType::Float,
            Expression::Arithmetic { op, left, right } => match op {
                ArithmeticOp::Add => match (left.result_type(), right.result_type()) {
                    (DataType::Float, DataType::Float) => DataType::Float,
                    (DataType::Datetime, DataType::Timedelta) => DataType::Datetime,
                    (DataType::Timedelta, DataType::Datetime) => DataType::Datetime,
                    (DataType::Timedelta, DataType::Timedelta) => DataType::Timedelta,
                    _ => DataType::Undefined,
                },
                ArithmeticOp::Sub => match (left.result_type(), right.result_type()) {
                    (DataType::Float, DataType::Float) => DataType::Float,
                    (DataType::Datetime, DataType::Datetime) => DataType::Timedelta,
                    (DataType::Datetime, DataType::Timedelta) => DataType::Datetime,
                    (DataType::Timedelta, DataType::Timedelta) => DataType::Timedelta,
                    _ => DataType::Undefined,
                },
                _ => DataType::Float,
            },
            Expression::Bitwise { .. } => DataType::Float,
            Expression::Comparison { .. }
            | Expression::ArithmeticComparison { .. }
            | Expression::FuzzyComparison { .. }
            | Expression::Logic { .. }
            | Expression::Contains { .. } => DataType::Boolean,
            Expression::Ternary {
                case_true,
                case_false,
                ..
            } => {
                let true_type = case_true.result_type();
                if true_type == case_false.result_type() {
                    true_type
                } else {
                    DataType::Undefined
                }
            }
            Expression::Comprehension { result, .. } => {
                DataType::array_of(result.result_type())
            }
        }
    }

    /// Constant-fold this node when every operand child is already literal.
    /// Folding evaluates the node once with a null thing, which is also how
    /// statically detectable errors surface at parse time.
    fn reduce(self, context: &Context) -> Result<Expression, EngineError> {
        let reducible = match &self {
            Expression::Array(members) | Expression::Set(members) => {
                members.iter().all(Expression::is_literal)
            }
            Expression::Mapping(entries) => entries
                .iter()
                .all(|(key, value)| key.is_literal() && value.is_literal()),
            Expression::Unary { operand, .. } => operand.is_literal(),
            Expression::Arithmetic { left, right, .. }
            | Expression::Bitwise { left, right, .. }
            | Expression::Comparison { left, right, .. }
            | Expression::ArithmeticComparison { left, right, .. }
            | Expression::FuzzyComparison { left, right, .. }
            | Expression::Logic { left, right, .. } => left.is_literal() && right.is_literal(),
            Expression::Contains { member, container } => {
                member.is_literal() && container.is_literal()
            }
            Expression::GetItem {
                container, item, ..
            } => container.is_literal() && item.is_literal(),
            Expression::GetSlice {
                container,
                start,
                stop,
                ..
            } => {
                container.is_literal()
                    && start.as_deref().map_or(true, Expression::is_literal)
                    && stop.as_deref().map_or(true, Expression::is_literal)
            }
            _ => false,
        };
        if !reducible {
            return Ok(self);
        }
        let value = self.evaluate(context, &Value::Null)?;
        Ok(Expression::Literal(value))
    }

    // ========================================================================
    // Smart constructors, used while the parser realises deferred nodes
    // ========================================================================

    pub(crate) fn array(context: &Context, members: Vec<Expression>) -> Result<Self, EngineError> {
        Expression::Array(members).reduce(context)
    }

    pub(crate) fn set(context: &Context, members: Vec<Expression>) -> Result<Self, EngineError> {
        for member in &members {
            let member_type = member.result_type();
            if member_type != DataType::Undefined && !member_type.is_valid_key() {
                return Err(EvaluationError::TypeMismatch.into());
            }
        }
        Expression::Set(members).reduce(context)
    }

    pub(crate) fn mapping(
        context: &Context,
        entries: Vec<(Expression, Expression)>,
    ) -> Result<Self, EngineError> {
        for (key, _) in &entries {
            let key_type = key.result_type();
            if key_type != DataType::Undefined && !key_type.is_valid_key() {
                return Err(EvaluationError::TypeMismatch.into());
            }
        }
        Expression::Mapping(entries).reduce(context)
    }

    pub(crate) fn unary(
        context: &Context,
        op: UnaryOp,
        operand: Expression,
    ) -> Result<Self, EngineError> {
        if op == UnaryOp::Uminus {
            check_operand(&operand, &[DataType::Float])?;
        }
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
        .reduce(context)
    }

    pub(crate) fn arithmetic(
        context: &Context,
        op: ArithmeticOp,
        left: Expression,
        right: Expression,
    ) -> Result<Self, EngineError> {
        let compatible: &[DataType] = match op {
            ArithmeticOp::Add | ArithmeticOp::Sub => TEMPORAL_ARITHMETIC_TYPES,
            _ => &[DataType::Float],
        };
        check_operand(&left, compatible)?;
        check_operand(&right, compatible)?;
        Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
        .reduce(context)
    }

    pub(crate) fn bitwise(
        context: &Context,
        op: BitwiseOp,
        left: Expression,
        right: Expression,
    ) -> Result<Self, EngineError> {
        check_operand(&left, &[DataType::Float])?;
        check_operand(&right, &[DataType::Float])?;
        // literal operands must be natural numbers, checked eagerly so the
        // error surfaces at parse time even when the other side is a symbol
        for operand in [&left, &right] {
            if let Expression::Literal(value) = operand {
                as_natural(value)?;
            }
        }
        Expression::Bitwise {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
        .reduce(context)
    }

    pub(crate) fn comparison(
        context: &Context,
        op: ComparisonOp,
        left: Expression,
        right: Expression,
    ) -> Result<Self, EngineError> {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
        .reduce(context)
    }

    pub(crate) fn arithmetic_comparison(
        context: &Context,
        op: OrderOp,
        left: Expression,
        right: Expression,
    ) -> Result<Self, EngineError> {
        check_operand(&left, &[DataType::Float])?;
        check_operand(&right, &[DataType::Float])?;
        Expression::ArithmeticComparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
        .reduce(context)
    }

    pub(crate) fn fuzzy_comparison(
        context: &Context,
        op: FuzzyOp,
        left: Expression,
        right: Expression,
    ) -> Result<Self, EngineError> {
        check_operand(&left, &[DataType::String])?;
        check_operand(&right, &[DataType::String])?;
        let regex = match &right {
            Expression::Literal(Value::String(pattern)) => {
                Some(context.compile_regex(pattern, !op.is_search())?)
            }
            _ => None,
        };
        Expression::FuzzyComparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
            regex,
        }
        .reduce(context)
    }

    pub(crate) fn logic(
        context: &Context,
        op: LogicOp,
        left: Expression,
        right: Expression,
    ) -> Result<Self, EngineError> {
        Expression::Logic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
        .reduce(context)
    }

    pub(crate) fn contains(
        context: &Context,
        member: Expression,
        container: Expression,
    ) -> Result<Self, EngineError> {
        let container_type = container.result_type();
        if container_type != DataType::Undefined {
            if container_type.iterable_value_type().is_none() {
                return Err(EvaluationError::TypeMismatch.into());
            }
            if container_type == DataType::String {
                check_operand(&member, &[DataType::String])?;
            }
        }
        Expression::Contains {
            member: Box::new(member),
            container: Box::new(container),
        }
        .reduce(context)
    }

    pub(crate) fn ternary(
        condition: Expression,
        case_true: Expression,
        case_false: Expression,
    ) -> Result<Self, EngineError> {
        // the branches are already reduced, so a literal condition folds the
        // whole node into whichever branch is taken
        if let Expression::Literal(value) = &condition {
            return Ok(if value.is_truthy() { case_true } else { case_false });
        }
        Ok(Expression::Ternary {
            condition: Box::new(condition),
            case_true: Box::new(case_true),
            case_false: Box::new(case_false),
        })
    }

    pub(crate) fn get_attribute(object: Expression, name: String, safe: bool) -> Self {
        Expression::GetAttribute {
            object: Box::new(object),
            name,
            safe,
        }
    }

    pub(crate) fn get_item(
        context: &Context,
        container: Expression,
        item: Expression,
        safe: bool,
    ) -> Result<Self, EngineError> {
        match container.result_type() {
            DataType::Undefined | DataType::Null | DataType::Mapping { .. } => {}
            DataType::Array { .. } | DataType::String => {
                check_operand(&item, &[DataType::Float])?;
            }
            _ => return Err(EvaluationError::TypeMismatch.into()),
        }
        Expression::GetItem {
            container: Box::new(container),
            item: Box::new(item),
            safe,
        }
        .reduce(context)
    }

    pub(crate) fn get_slice(
        context: &Context,
        container: Expression,
        start: Option<Expression>,
        stop: Option<Expression>,
        safe: bool,
    ) -> Result<Self, EngineError> {
        match container.result_type() {
            DataType::Undefined | DataType::Null | DataType::Array { .. } | DataType::String => {}
            _ => return Err(EvaluationError::TypeMismatch.into()),
        }
        for bound in [&start, &stop].into_iter().flatten() {
            check_operand(bound, &[DataType::Float])?;
        }
        Expression::GetSlice {
            container: Box::new(container),
            start: start.map(Box::new),
            stop: stop.map(Box::new),
            safe,
        }
        .reduce(context)
    }

    pub(crate) fn call(
        function: Expression,
        arguments: Vec<Expression>,
    ) -> Result<Self, EngineError> {
        if let DataType::Function(signature) = function.result_type() {
            if let Some(argument_types) = &signature.argument_types {
                let minimum = signature.minimum_arguments.unwrap_or(argument_types.len());
                if arguments.len() < minimum || arguments.len() > argument_types.len() {
                    return Err(EvaluationError::function_call(
                        function_name(&function),
                        format!(
                            "expected {} to {} arguments, got {}",
                            minimum,
                            argument_types.len(),
                            arguments.len()
                        ),
                    )
                    .into());
                }
                for (argument, declared) in arguments.iter().zip(argument_types.iter()) {
                    check_operand(argument, std::slice::from_ref(declared))?;
                }
            }
        }
        Ok(Expression::Call {
            function: Box::new(function),
            arguments,
        })
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate this node and all applicable children against *thing*.
    pub fn evaluate(&self, context: &Context, thing: &Value) -> Result<Value, EngineError> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Array(members) => {
                let mut values = Vec::with_capacity(members.len());
                for member in members {
                    values.push(member.evaluate(context, thing)?);
                }
                Ok(Value::Array(values))
            }
            Expression::Set(members) => {
                let mut values = Vec::with_capacity(members.len());
                for member in members {
                    values.push(member.evaluate(context, thing)?);
                }
                Ok(Value::set_of(values))
            }
            Expression::Mapping(entries) => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    pairs.push((
                        key.evaluate(context, thing)?,
                        value.evaluate(context, thing)?,
                    ));
                }
                Ok(Value::mapping_of(pairs))
            }
            Expression::Symbol {
                name,
                scope,
                result_type,
            } => {
                let value = context.resolve(thing, name, *scope)?;
                if *result_type != DataType::Undefined && !value.is_null() {
                    let value_type = value.data_type();
                    if !value_type.is_compatible(result_type) {
                        return Err(EvaluationError::SymbolType {
                            name: name.clone(),
                            is_type: value_type,
                            expected_type: result_type.clone(),
                        }
                        .into());
                    }
                }
                Ok(value)
            }
            Expression::GetAttribute { object, name, safe } => {
                let object_value = object.evaluate(context, thing)?;
                if object_value.is_null() && *safe {
                    return Ok(Value::Null);
                }
                let value = context.resolve_attribute(&object_value, name)?;
                let declared = self.result_type();
                if declared != DataType::Undefined && !value.is_null() {
                    let value_type = value.data_type();
                    if !value_type.is_compatible(&declared) {
                        return Err(EvaluationError::AttributeType {
                            name: name.clone(),
                            is_type: value_type,
                            expected_type: declared,
                        }
                        .into());
                    }
                }
                Ok(value)
            }
            Expression::GetItem {
                container,
                item,
                safe,
            } => {
                let container_value = container.evaluate(context, thing)?;
                if container_value.is_null() && *safe {
                    return Ok(Value::Null);
                }
                let item_value = item.evaluate(context, thing)?;
                match evaluate_get_item(&container_value, &item_value) {
                    Err(EvaluationError::Lookup) if *safe => Ok(Value::Null),
                    other => other.map_err(Into::into),
                }
            }
            Expression::GetSlice {
                container,
                start,
                stop,
                safe,
            } => {
                let container_value = container.evaluate(context, thing)?;
                if container_value.is_null() && *safe {
                    return Ok(Value::Null);
                }
                let start = evaluate_slice_bound(context, thing, start.as_deref())?;
                let stop = evaluate_slice_bound(context, thing, stop.as_deref())?;
                match &container_value {
                    Value::Array(members) => {
                        let (from, to) = slice_bounds(members.len(), start, stop);
                        Ok(Value::Array(members[from..to].to_vec()))
                    }
                    Value::String(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        let (from, to) = slice_bounds(chars.len(), start, stop);
                        Ok(Value::String(chars[from..to].iter().collect()))
                    }
                    _ => Err(EvaluationError::TypeMismatch.into()),
                }
            }
            Expression::Call {
                function,
                arguments,
            } => {
                let function_value = function.evaluate(context, thing)?;
                let function_value = match function_value {
                    Value::Function(f) => f,
                    _ => {
                        return Err(EvaluationError::function_call(
                            function_name(function),
                            "value is not a function",
                        )
                        .into())
                    }
                };
                let mut argument_values = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    argument_values.push(argument.evaluate(context, thing)?);
                }
                Ok(function_value.invoke(&argument_values)?)
            }
            Expression::Unary { op, operand } => {
                let value = operand.evaluate(context, thing)?;
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Uminus => match value {
                        Value::Float(float) => Ok(Value::Float(float.neg())),
                        _ => Err(EvaluationError::TypeMismatch.into()),
                    },
                }
            }
            Expression::Arithmetic { op, left, right } => {
                let left = left.evaluate(context, thing)?;
                let right = right.evaluate(context, thing)?;
                evaluate_arithmetic(*op, &left, &right).map_err(Into::into)
            }
            Expression::Bitwise { op, left, right } => {
                let left = as_natural(&left.evaluate(context, thing)?)?;
                let right = as_natural(&right.evaluate(context, thing)?)?;
                let result = match op {
                    BitwiseOp::And => Some(left & right),
                    BitwiseOp::Or => Some(left | right),
                    BitwiseOp::Xor => Some(left ^ right),
                    BitwiseOp::ShiftLeft => u32::try_from(right).ok().and_then(|shift| {
                        // reject shifts that would discard set bits
                        if left == 0 {
                            Some(0)
                        } else if shift <= left.leading_zeros() {
                            left.checked_shl(shift)
                        } else {
                            None
                        }
                    }),
                    BitwiseOp::ShiftRight => u32::try_from(right)
                        .ok()
                        .map(|shift| left.checked_shr(shift).unwrap_or(0)),
                };
                let result = result.ok_or(EvaluationError::TypeMismatch)?;
                Ok(Value::from(result))
            }
            Expression::Comparison { op, left, right } => {
                let left = left.evaluate(context, thing)?;
                let right = right.evaluate(context, thing)?;
                let equal = left == right;
                Ok(Value::Boolean(match op {
                    ComparisonOp::Eq => equal,
                    ComparisonOp::Ne => !equal,
                }))
            }
            Expression::ArithmeticComparison { op, left, right } => {
                // ordering is defined for real numbers only
                let left = as_real(&left.evaluate(context, thing)?)?;
                let right = as_real(&right.evaluate(context, thing)?)?;
                let ordering = left
                    .partial_cmp(&right)
                    .ok_or(EvaluationError::TypeMismatch)?;
                Ok(Value::Boolean(match op {
                    OrderOp::Lt => ordering.is_lt(),
                    OrderOp::Le => ordering.is_le(),
                    OrderOp::Gt => ordering.is_gt(),
                    OrderOp::Ge => ordering.is_ge(),
                }))
            }
            Expression::FuzzyComparison {
                op,
                left,
                right,
                regex,
            } => {
                let subject = match left.evaluate(context, thing)? {
                    Value::String(s) => s,
                    _ => return Err(EvaluationError::TypeMismatch.into()),
                };
                let compiled;
                let regex = match regex {
                    Some(regex) => regex,
                    None => {
                        let pattern = match right.evaluate(context, thing)? {
                            Value::String(p) => p,
                            _ => return Err(EvaluationError::TypeMismatch.into()),
                        };
                        compiled = context.compile_regex(&pattern, !op.is_search())?;
                        &compiled
                    }
                };
                let matched = match regex.captures(&subject) {
                    Some(captures) => {
                        context.store_regex_groups(&captures);
                        true
                    }
                    None => {
                        context.clear_regex_groups();
                        false
                    }
                };
                Ok(Value::Boolean(matched != op.is_negated()))
            }
            Expression::Logic { op, left, right } => {
                let left = left.evaluate(context, thing)?.is_truthy();
                let result = match op {
                    LogicOp::And => left && right.evaluate(context, thing)?.is_truthy(),
                    LogicOp::Or => left || right.evaluate(context, thing)?.is_truthy(),
                };
                Ok(Value::Boolean(result))
            }
            Expression::Contains { member, container } => {
                let member = member.evaluate(context, thing)?;
                let container = container.evaluate(context, thing)?;
                Ok(Value::Boolean(container.contains(&member)?))
            }
            Expression::Ternary {
                condition,
                case_true,
                case_false,
            } => {
                if condition.evaluate(context, thing)?.is_truthy() {
                    case_true.evaluate(context, thing)
                } else {
                    case_false.evaluate(context, thing)
                }
            }
            Expression::Comprehension {
                result,
                variable,
                iterable,
                condition,
            } => {
                let members = iterable
                    .evaluate(context, thing)?
                    .iterable_members()
                    .ok_or(EvaluationError::TypeMismatch)?;
                let mut values = Vec::new();
                for member in members {
                    // the guard holds the binding frame and pops it on every
                    // exit, including evaluation failures
                    let _scope = context.push_scope(variable.clone(), member);
                    if let Some(condition) = condition {
                        if !condition.evaluate(context, thing)?.is_truthy() {
                            continue;
                        }
                    }
                    values.push(result.evaluate(context, thing)?);
                }
                Ok(Value::Array(values))
            }
        }
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        use Expression::*;
        match (self, other) {
            (Literal(l), Literal(r)) => l == r,
            (Array(l), Array(r)) | (Set(l), Set(r)) => l == r,
            (Mapping(l), Mapping(r)) => l == r,
            (
                Symbol {
                    name: n1,
                    scope: s1,
                    result_type: t1,
                },
                Symbol {
                    name: n2,
                    scope: s2,
                    result_type: t2,
                },
            ) => n1 == n2 && s1 == s2 && t1 == t2,
            (
                GetAttribute {
                    object: o1,
                    name: n1,
                    safe: s1,
                },
                GetAttribute {
                    object: o2,
                    name: n2,
                    safe: s2,
                },
            ) => o1 == o2 && n1 == n2 && s1 == s2,
            (
                GetItem {
                    container: c1,
                    item: i1,
                    safe: s1,
                },
                GetItem {
                    container: c2,
                    item: i2,
                    safe: s2,
                },
            ) => c1 == c2 && i1 == i2 && s1 == s2,
            (
                GetSlice {
                    container: c1,
                    start: a1,
                    stop: b1,
                    safe: s1,
                },
                GetSlice {
                    container: c2,
                    start: a2,
                    stop: b2,
                    safe: s2,
                },
            ) => c1 == c2 && a1 == a2 && b1 == b2 && s1 == s2,
            (
                Call {
                    function: f1,
                    arguments: a1,
                },
                Call {
                    function: f2,
                    arguments: a2,
                },
            ) => f1 == f2 && a1 == a2,
            (
                Unary {
                    op: o1,
                    operand: e1,
                },
                Unary {
                    op: o2,
                    operand: e2,
                },
            ) => o1 == o2 && e1 == e2,
            (
                Arithmetic {
                    op: o1,
                    left: l1,
                    right: r1,
                },
                Arithmetic {
                    op: o2,
                    left: l2,
                    right: r2,
                },
            ) => o1 == o2 && l1 == l2 && r1 == r2,
            (
                Bitwise {
                    op: o1,
                    left: l1,
                    right: r1,
                },
                Bitwise {
                    op: o2,
                    left: l2,
                    right: r2,
                },
            ) => o1 == o2 && l1 == l2 && r1 == r2,
            (
                Comparison {
                    op: o1,
                    left: l1,
                    right: r1,
                },
                Comparison {
                    op: o2,
                    left: l2,
                    right: r2,
                },
            ) => o1 == o2 && l1 == l2 && r1 == r2,
            (
                ArithmeticComparison {
                    op: o1,
                    left: l1,
                    right: r1,
                },
                ArithmeticComparison {
                    op: o2,
                    left: l2,
                    right: r2,
                },
            ) => o1 == o2 && l1 == l2 && r1 == r2,
            (
                FuzzyComparison {
                    op: o1,
                    left: l1,
                    right: r1,
                    regex: x1,
                },
                FuzzyComparison {
                    op: o2,
                    left: l2,
                    right: r2,
                    regex: x2,
                },
            ) => {
                o1 == o2
                    && l1 == l2
                    && r1 == r2
                    && x1.as_ref().map(regex::Regex::as_str)
                        == x2.as_ref().map(regex::Regex::as_str)
            }
            (
                Logic {
                    op: o1,
                    left: l1,
                    right: r1,
                },
                Logic {
                    op: o2,
                    left: l2,
                    right: r2,
                },
            ) => o1 == o2 && l1 == l2 && r1 == r2,
            (
                Contains {
                    member: m1,
                    container: c1,
                },
                Contains {
                    member: m2,
                    container: c2,
                },
            ) => m1 == m2 && c1 == c2,
            (
                Ternary {
                    condition: c1,
                    case_true: t1,
                    case_false: f1,
                },
                Ternary {
                    condition: c2,
                    case_true: t2,
                    case_false: f2,
                },
            ) => c1 == c2 && t1 == t2 && f1 == f2,
            (
                Comprehension {
                    result: r1,
                    variable: v1,
                    iterable: i1,
                    condition: c1,
                },
                Comprehension {
                    result: r2,
                    variable: v2,
                    iterable: i2,
                    condition: c2,
                },
            ) => r1 == r2 && v1 == v2 && i1 == i2 && c1 == c2,
            _ => false,
        }
    }
}

fn function_name(function: &Expression) -> String {
    match function {
        Expression::Symbol { name, .. } => name.clone(),
        Expression::GetAttribute { name, .. } => name.clone(),
        Expression::Literal(Value::Function(f)) => f.name.clone(),
        _ => "<expression>".to_string(),
    }
}

fn evaluate_arithmetic(
    op: ArithmeticOp,
    left: &Value,
    right: &Value,
) -> Result<Value, EvaluationError> {
    match op {
        ArithmeticOp::Add => match (left, right) {
            (Value::Datetime(dt), Value::Timedelta(td))
            | (Value::Timedelta(td), Value::Datetime(dt)) => dt
                .checked_add_signed(*td)
                .map(Value::Datetime)
                .ok_or(EvaluationError::TypeMismatch),
            (Value::Timedelta(l), Value::Timedelta(r)) => l
                .checked_add(r)
                .map(Value::Timedelta)
                .ok_or(EvaluationError::TypeMismatch),
            _ => numeric_arithmetic(left, right, Float::add),
        },
        ArithmeticOp::Sub => match (left, right) {
            (Value::Datetime(l), Value::Datetime(r)) => Ok(Value::Timedelta(*l - *r)),
            (Value::Datetime(dt), Value::Timedelta(td)) => dt
                .checked_sub_signed(*td)
                .map(Value::Datetime)
                .ok_or(EvaluationError::TypeMismatch),
            (Value::Timedelta(l), Value::Timedelta(r)) => l
                .checked_sub(r)
                .map(Value::Timedelta)
                .ok_or(EvaluationError::TypeMismatch),
            _ => numeric_arithmetic(left, right, Float::sub),
        },
        ArithmeticOp::Mul => numeric_arithmetic(left, right, Float::mul),
        ArithmeticOp::TrueDiv => numeric_arithmetic(left, right, Float::tdiv),
        ArithmeticOp::FloorDiv => numeric_arithmetic(left, right, Float::fdiv),
        ArithmeticOp::Mod => numeric_arithmetic(left, right, Float::rem),
        ArithmeticOp::Pow => numeric_arithmetic(left, right, Float::pow),
    }
}

fn numeric_arithmetic(
    left: &Value,
    right: &Value,
    op: impl FnOnce(&Float, &Float) -> Result<Float, EvaluationError>,
) -> Result<Value, EvaluationError> {
    let left = as_real(left)?;
    let right = as_real(right)?;
    op(&left, &right).map(Value::Float)
}

fn evaluate_get_item(container: &Value, item: &Value) -> Result<Value, EvaluationError> {
    match container {
        Value::Array(members) => {
            let index = item
                .as_index()
                .ok_or(EvaluationError::TypeMismatch)?;
            let index = normalize_index(index, members.len()).ok_or(EvaluationError::Lookup)?;
            Ok(members[index].clone())
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let index = item
                .as_index()
                .ok_or(EvaluationError::TypeMismatch)?;
            let index = normalize_index(index, chars.len()).ok_or(EvaluationError::Lookup)?;
            Ok(Value::String(chars[index].to_string()))
        }
        Value::Mapping(entries) => entries
            .iter()
            .find(|(key, _)| key == item)
            .map(|(_, value)| value.clone())
            .ok_or(EvaluationError::Lookup),
        _ => Err(EvaluationError::TypeMismatch),
    }
}

fn normalize_index(index: i64, length: usize) -> Option<usize> {
    let length = length as i64;
    let index = if index < 0 { length + index } else { index };
    if (0..length).contains(&index) {
        Some(index as usize)
    } else {
        None
    }
}

fn evaluate_slice_bound(
    context: &Context,
    thing: &Value,
    bound: Option<&Expression>,
) -> Result<Option<i64>, EngineError> {
    match bound {
        None => Ok(None),
        Some(expression) => match expression.evaluate(context, thing)? {
            Value::Null => Ok(None),
            value => value
                .as_index()
                .map(Some)
                .ok_or_else(|| EvaluationError::TypeMismatch.into()),
        },
    }
}

impl Value {
    /// Interpret this value as a container index.
    fn as_index(&self) -> Option<i64> {
        match self {
            Value::Float(f) => f.as_i64(),
            _ => None,
        }
    }
}

/// The top level node of a parsed rule: an expression with an optional
/// trailing comment.
#[derive(Debug, Clone)]
pub struct Statement {
    pub expression: Expression,
    pub comment: Option<String>,
}

impl Statement {
    pub fn evaluate(&self, context: &Context, thing: &Value) -> Result<Value, EngineError> {
        self.expression.evaluate(context, thing)
    }
}
