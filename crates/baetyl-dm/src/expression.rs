//! Mapping expressions: `method(arg, ...)` where an arg is `x<ID>` or a
//! numeric literal.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DmError, DmResult};
use crate::models::PropertyType;
use crate::value::{narrow_f32, PropertyValue};

static CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*$").expect("call regex is valid")
});

static VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^x([A-Za-z0-9_\-]+)$").expect("variable regex is valid"));

static NUM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("number regex is valid")
});

/// Decimal places kept by `subtraction` for float results.
const SUBTRACTION_PLACES: u32 = 4;

/// The closed set of mapping methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Equal,
    Sum,
    Product,
    Subtraction,
    Ratio,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::Sum => "sum",
            Self::Product => "product",
            Self::Subtraction => "subtraction",
            Self::Ratio => "ratio",
        }
    }
}

impl FromStr for Method {
    type Err = DmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "equal" => Self::Equal,
            "sum" => Self::Sum,
            "product" => Self::Product,
            "subtraction" => Self::Subtraction,
            "ratio" => Self::Ratio,
            other => return Err(DmError::UnknownExpressionMethod(other.to_string())),
        })
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One argument of an expression, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Reference to a property ID, without the leading `x`.
    Var(String),
    /// Numeric literal, kept as written.
    Literal(String),
}

/// A parsed mapping expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub method: Method,
    /// Referenced property IDs in order of appearance.
    pub args: Vec<String>,
    /// Literals in order of appearance.
    pub nums: Vec<String>,
    pub operands: Vec<Operand>,
}

impl Expression {
    /// Arguments with every variable replaced by `substitute(id)`.
    pub fn bind<F>(&self, mut substitute: F) -> Vec<String>
    where
        F: FnMut(&str) -> String,
    {
        self.operands
            .iter()
            .map(|op| match op {
                Operand::Var(id) => substitute(id),
                Operand::Literal(num) => num.clone(),
            })
            .collect()
    }
}

impl FromStr for Expression {
    type Err = DmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_expression(s)
    }
}

/// Parse `method(arg, ...)`.
pub fn parse_expression(expression: &str) -> DmResult<Expression> {
    let caps = CALL_RE
        .captures(expression)
        .ok_or_else(|| DmError::InvalidExpression(expression.to_string()))?;
    let method: Method = caps[1].parse()?;

    let mut args = Vec::new();
    let mut nums = Vec::new();
    let mut operands = Vec::new();
    for raw in caps[2].split(',') {
        let token = raw.trim();
        if let Some(var) = VAR_RE.captures(token) {
            let id = var[1].to_string();
            args.push(id.clone());
            operands.push(Operand::Var(id));
        } else if NUM_RE.is_match(token) {
            nums.push(token.to_string());
            operands.push(Operand::Literal(token.to_string()));
        } else {
            return Err(DmError::InvalidExpressionArgs(format!(
                "'{}' in {}",
                token, expression
            )));
        }
    }

    Ok(Expression {
        method,
        args,
        nums,
        operands,
    })
}

/// Evaluate `method` over already-bound arguments.
///
/// `equal` returns its single argument unchanged. The arithmetic methods
/// produce a value of `result_type`: integer results work on arguments
/// truncated toward zero, float results on the float64 values.
pub fn exec_mapping(
    method: Method,
    args: &[String],
    result_type: PropertyType,
) -> DmResult<PropertyValue> {
    let arity_ok = match method {
        Method::Equal => args.len() == 1,
        Method::Sum | Method::Product => args.len() >= 2,
        Method::Subtraction | Method::Ratio => args.len() == 2,
    };
    if !arity_ok {
        return Err(DmError::InvalidExpressionArgs(format!(
            "{} does not take {} args",
            method,
            args.len()
        )));
    }

    if method == Method::Equal {
        return Ok(PropertyValue::String(args[0].clone()));
    }
    if !result_type.is_numeric() {
        return Err(DmError::UnsupportedArgType(result_type.to_string()));
    }

    if method == Method::Ratio {
        let divisor = parse_arg(&args[1])?;
        if divisor == 0.0 {
            return Err(DmError::DivisorZero);
        }
    }

    if result_type.is_integer() {
        let values = args.iter().map(|a| parse_int_arg(a)).collect::<DmResult<Vec<_>>>()?;
        let result = match method {
            Method::Sum => values.iter().try_fold(0i64, |acc, v| acc.checked_add(*v)),
            Method::Product => values.iter().try_fold(1i64, |acc, v| acc.checked_mul(*v)),
            Method::Subtraction => values[0].checked_sub(values[1]),
            Method::Ratio => {
                if values[1] == 0 {
                    return Err(DmError::DivisorZero);
                }
                values[0].checked_div(values[1])
            }
            Method::Equal => Some(values[0]),
        }
        .ok_or_else(|| DmError::unsupported_value(args.join(","), result_type))?;
        return finish_int(result, result_type);
    }

    let values = args.iter().map(|a| parse_arg(a)).collect::<DmResult<Vec<_>>>()?;
    let result: f64 = match method {
        Method::Sum => values.iter().sum(),
        Method::Product => values.iter().product(),
        Method::Subtraction => round_decimals(values[0] - values[1], SUBTRACTION_PLACES),
        Method::Ratio => values[0] / values[1],
        Method::Equal => values[0],
    };
    finish_float(result, result_type)
}

/// Round half away from zero to `places` decimals.
pub(crate) fn round_decimals(value: f64, places: u32) -> f64 {
    let scale = 10f64.powi(places as i32);
    let rounded = (value * scale).round() / scale;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}

fn parse_arg(arg: &str) -> DmResult<f64> {
    arg.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DmError::InvalidExpressionArgs(format!("'{}' is not a number", arg)))
}

fn parse_int_arg(arg: &str) -> DmResult<i64> {
    let v = parse_arg(arg)?.trunc();
    if v < i64::MIN as f64 || v >= i64::MAX as f64 {
        return Err(DmError::unsupported_value(arg, PropertyType::Int64));
    }
    Ok(v as i64)
}

fn finish_int(value: i64, ty: PropertyType) -> DmResult<PropertyValue> {
    let overflow = |_| DmError::unsupported_value(value, ty);
    match ty {
        PropertyType::Int16 => i16::try_from(value).map(PropertyValue::Int16).map_err(overflow),
        PropertyType::Int32 => i32::try_from(value).map(PropertyValue::Int32).map_err(overflow),
        _ => Ok(PropertyValue::Int64(value)),
    }
}

fn finish_float(value: f64, ty: PropertyType) -> DmResult<PropertyValue> {
    match ty {
        PropertyType::Float32 => narrow_f32(value)
            .map(PropertyValue::Float32)
            .ok_or_else(|| DmError::unsupported_value(value, ty)),
        _ if value.is_finite() => Ok(PropertyValue::Float64(value)),
        _ => Err(DmError::unsupported_value(value, ty)),
    }
}
