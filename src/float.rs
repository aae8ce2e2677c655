// ABOUTME: Decimal FLOAT values with IEEE-style infinity and NaN specials

use crate::errors::{EvaluationError, SyntaxError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use std::cmp::Ordering;
use std::fmt;

/// A FLOAT value. The numeric tower is decimal rather than binary so literals
/// like `0.1` behave the way they read, but the `inf` and `nan` keywords still
/// need representations, which `Decimal` does not carry. Arithmetic on the
/// specials follows IEEE-754 conventions.
#[derive(Debug, Clone, Copy)]
pub enum Float {
    Finite(Decimal),
    PosInfinity,
    NegInfinity,
    NaN,
}

impl Float {
    pub const PI: Float = Float::Finite(Decimal::PI);
    pub const E: Float = Float::Finite(Decimal::E);

    pub fn zero() -> Self {
        Float::Finite(Decimal::ZERO)
    }

    /// Parse a float literal as produced by the lexer: base-10 with an
    /// optional fraction and exponent, a leading-dot fraction, or a prefixed
    /// binary/octal/hexadecimal integer. Leading zeros in base-10 literals
    /// are rejected.
    pub fn parse(literal: &str) -> Result<Self, SyntaxError> {
        let error = |message: &str| SyntaxError::Float {
            message: message.to_string(),
            value: literal.to_string(),
        };
        let mut chars = literal.chars();
        if chars.next() == Some('0') {
            match chars.next() {
                Some(radix_char @ ('b' | 'o' | 'x')) => {
                    let radix = match radix_char {
                        'b' => 2,
                        'o' => 8,
                        _ => 16,
                    };
                    let magnitude = u64::from_str_radix(&literal[2..], radix)
                        .map_err(|_| error("unparsable digits for the base prefix"))?;
                    return Ok(Float::Finite(Decimal::from(magnitude)));
                }
                Some('0'..='9') => {
                    return Err(error("leading zeros in decimal literals are not permitted"));
                }
                _ => {}
            }
        }
        // "42." is valid in the grammar but not for the decimal parser
        let normalized = if literal.ends_with('.') {
            format!("{literal}0")
        } else {
            literal.to_string()
        };
        let parsed = if normalized.contains(['e', 'E']) {
            Decimal::from_scientific(&normalized)
        } else {
            normalized.parse::<Decimal>()
        };
        parsed
            .map(Float::Finite)
            .map_err(|_| error("unparsable decimal value"))
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Float::NaN)
    }

    /// A real number: finite and not NaN. Arithmetic requires real operands.
    pub fn is_real(&self) -> bool {
        matches!(self, Float::Finite(_))
    }

    /// A whole number, e.g. `3.0`, which can be converted to an integer
    /// without loss of information.
    pub fn is_integer(&self) -> bool {
        match self {
            Float::Finite(d) => d.fract().is_zero(),
            _ => false,
        }
    }

    /// A whole, non-negative number. Bitwise operands must satisfy this.
    pub fn is_natural(&self) -> bool {
        match self {
            Float::Finite(d) => d.fract().is_zero() && !d.is_sign_negative(),
            _ => false,
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Float::Finite(d) if d.is_zero())
    }

    /// Convert to an i64 when the value is a whole number in range, as
    /// required for container indexing.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Float::Finite(d) if d.fract().is_zero() => d.trunc().to_i64(),
            _ => None,
        }
    }

    /// Convert to a u64 when the value is a natural number in range, as
    /// required for bitwise operands.
    pub fn as_u64(&self) -> Option<u64> {
        if !self.is_natural() {
            return None;
        }
        self.as_i64().and_then(|v| u64::try_from(v).ok())
    }

    fn binary(
        &self,
        other: &Float,
        op: impl FnOnce(Decimal, Decimal) -> Float,
    ) -> Result<Float, EvaluationError> {
        match (self, other) {
            (Float::Finite(left), Float::Finite(right)) => Ok(op(*left, *right)),
            _ => Err(EvaluationError::TypeMismatch),
        }
    }

    pub fn add(&self, other: &Float) -> Result<Float, EvaluationError> {
        self.binary(other, |l, r| match l.checked_add(r) {
            Some(sum) => Float::Finite(sum),
            None => Float::overflow(l.is_sign_negative()),
        })
    }

    pub fn sub(&self, other: &Float) -> Result<Float, EvaluationError> {
        self.binary(other, |l, r| match l.checked_sub(r) {
            Some(difference) => Float::Finite(difference),
            None => Float::overflow(l.is_sign_negative()),
        })
    }

    pub fn mul(&self, other: &Float) -> Result<Float, EvaluationError> {
        self.binary(other, |l, r| match l.checked_mul(r) {
            Some(product) => Float::Finite(product),
            None => Float::overflow(l.is_sign_negative() != r.is_sign_negative()),
        })
    }

    /// True division. Division by zero follows IEEE: `x/0` is signed
    /// infinity and `0/0` is NaN.
    pub fn tdiv(&self, other: &Float) -> Result<Float, EvaluationError> {
        self.binary(other, |l, r| {
            if r.is_zero() {
                return Float::zero_division(&l);
            }
            match l.checked_div(r) {
                Some(quotient) => Float::Finite(quotient),
                None => Float::overflow(l.is_sign_negative() != r.is_sign_negative()),
            }
        })
    }

    /// Floor division.
    pub fn fdiv(&self, other: &Float) -> Result<Float, EvaluationError> {
        self.binary(other, |l, r| {
            if r.is_zero() {
                return Float::zero_division(&l);
            }
            match l.checked_div(r) {
                Some(quotient) => Float::Finite(quotient.floor()),
                None => Float::overflow(l.is_sign_negative() != r.is_sign_negative()),
            }
        })
    }

    pub fn rem(&self, other: &Float) -> Result<Float, EvaluationError> {
        self.binary(other, |l, r| {
            if r.is_zero() {
                return Float::NaN;
            }
            match l.checked_rem(r) {
                Some(remainder) => Float::Finite(remainder),
                None => Float::NaN,
            }
        })
    }

    pub fn pow(&self, other: &Float) -> Result<Float, EvaluationError> {
        self.binary(other, |l, r| match l.checked_powd(r) {
            Some(power) => Float::Finite(power),
            None => Float::NaN,
        })
    }

    pub fn neg(&self) -> Float {
        match self {
            Float::Finite(d) => Float::Finite(-*d),
            Float::PosInfinity => Float::NegInfinity,
            Float::NegInfinity => Float::PosInfinity,
            Float::NaN => Float::NaN,
        }
    }

    fn overflow(negative: bool) -> Float {
        if negative {
            Float::NegInfinity
        } else {
            Float::PosInfinity
        }
    }

    fn zero_division(dividend: &Decimal) -> Float {
        if dividend.is_zero() {
            Float::NaN
        } else if dividend.is_sign_negative() {
            Float::NegInfinity
        } else {
            Float::PosInfinity
        }
    }
}

impl From<Decimal> for Float {
    fn from(value: Decimal) -> Self {
        Float::Finite(value)
    }
}

impl From<i64> for Float {
    fn from(value: i64) -> Self {
        Float::Finite(Decimal::from(value))
    }
}

impl From<u64> for Float {
    fn from(value: u64) -> Self {
        Float::Finite(Decimal::from(value))
    }
}

impl TryFrom<f64> for Float {
    type Error = EvaluationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value.is_nan() {
            return Ok(Float::NaN);
        }
        if value.is_infinite() {
            return Ok(Float::overflow(value.is_sign_negative()));
        }
        Decimal::try_from(value)
            .map(Float::Finite)
            .map_err(|_| EvaluationError::TypeMismatch)
    }
}

impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // NaN is not equal to anything, itself included
            (Float::NaN, _) | (_, Float::NaN) => false,
            (Float::Finite(left), Float::Finite(right)) => left == right,
            (Float::PosInfinity, Float::PosInfinity) => true,
            (Float::NegInfinity, Float::NegInfinity) => true,
            _ => false,
        }
    }
}

impl PartialOrd for Float {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Float::NaN, _) | (_, Float::NaN) => None,
            (Float::Finite(left), Float::Finite(right)) => left.partial_cmp(right),
            (Float::PosInfinity, Float::PosInfinity) => Some(Ordering::Equal),
            (Float::NegInfinity, Float::NegInfinity) => Some(Ordering::Equal),
            (Float::PosInfinity, _) => Some(Ordering::Greater),
            (_, Float::PosInfinity) => Some(Ordering::Less),
            (Float::NegInfinity, _) => Some(Ordering::Less),
            (_, Float::NegInfinity) => Some(Ordering::Greater),
        }
    }
}

impl fmt::Display for Float {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Float::Finite(d) => write!(f, "{}", d.normalize()),
            Float::PosInfinity => write!(f, "inf"),
            Float::NegInfinity => write!(f, "-inf"),
            Float::NaN => write!(f, "nan"),
        }
    }
}
