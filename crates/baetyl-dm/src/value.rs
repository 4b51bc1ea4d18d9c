//! Value parsing against thing-model types.
//!
//! Two entry points share the same coercion rules for composite types:
//! - [`parse_value`] coerces permissively: numbers and numeric strings are
//!   both accepted for numeric targets.
//! - [`parse_property_value`] is used for values that arrive as JSON from the
//!   cloud side: numeric targets only accept JSON numbers, which are parsed
//!   from their decimal text so no precision is lost on the way to `float32`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::Value;

use crate::error::{DmError, DmResult};
use crate::models::{ArrayType, DeviceProperty, EnumType, ObjectType, PropertyType};

/// A value normalized to a thing-model type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Array(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int16(v) => Some(*v as f64),
            Self::Int32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::Float32(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32(_) | Self::Float64(_))
    }

    /// JSON form; `float32` values keep their shortest decimal spelling.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(v) => Value::Bool(*v),
            Self::Int16(v) => Value::from(*v),
            Self::Int32(v) => Value::from(*v),
            Self::Int64(v) => Value::from(*v),
            Self::Float32(v) => v
                .to_string()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Float64(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::String(v) => Value::String(v.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for PropertyValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int64(i),
                None => Self::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::Array(items.iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        Self::from(&value)
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Float32(v) => write!(f, "{}", v),
            Self::Float64(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
            Self::Array(_) | Self::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

/// Type-specific arguments of a parse.
#[derive(Debug, Clone, Copy, Default)]
pub enum ValueArgs<'a> {
    #[default]
    None,
    /// Output layout key of `time`/`date` values.
    Layout(&'a str),
    Enum(&'a EnumType),
    Array(&'a ArrayType),
    Object(&'a BTreeMap<String, ObjectType>),
}

impl<'a> ValueArgs<'a> {
    /// Arguments carried by a property definition.
    pub fn for_property(property: &'a DeviceProperty) -> Self {
        match property.property_type {
            PropertyType::Enum => property.enum_type.as_ref().map_or(Self::None, Self::Enum),
            PropertyType::Array => property.array_type.as_ref().map_or(Self::None, Self::Array),
            PropertyType::Object => property.object_type.as_ref().map_or(Self::None, Self::Object),
            PropertyType::Time | PropertyType::Date => property
                .format
                .as_deref()
                .map_or(Self::None, Self::Layout),
            _ => Self::None,
        }
    }

    fn layout(format: Option<&'a String>) -> Self {
        format.map_or(Self::None, |f| Self::Layout(f.as_str()))
    }
}

/// Coerce `value` into `ty`.
pub fn parse_value(
    ty: PropertyType,
    value: &Value,
    args: ValueArgs<'_>,
) -> DmResult<PropertyValue> {
    match ty {
        PropertyType::Int16 => {
            let v = coerce_i64(value).ok_or_else(|| DmError::unsupported_value(value, ty))?;
            i16::try_from(v)
                .map(PropertyValue::Int16)
                .map_err(|_| DmError::unsupported_value(value, ty))
        }
        PropertyType::Int32 => {
            let v = coerce_i64(value).ok_or_else(|| DmError::unsupported_value(value, ty))?;
            i32::try_from(v)
                .map(PropertyValue::Int32)
                .map_err(|_| DmError::unsupported_value(value, ty))
        }
        PropertyType::Int64 => coerce_i64(value)
            .map(PropertyValue::Int64)
            .ok_or_else(|| DmError::unsupported_value(value, ty)),
        PropertyType::Float32 => {
            let v = coerce_f64(value).ok_or_else(|| DmError::unsupported_value(value, ty))?;
            narrow_f32(v)
                .map(PropertyValue::Float32)
                .ok_or_else(|| DmError::unsupported_value(value, ty))
        }
        PropertyType::Float64 => coerce_f64(value)
            .map(PropertyValue::Float64)
            .ok_or_else(|| DmError::unsupported_value(value, ty)),
        PropertyType::Bool => coerce_bool(value)
            .map(PropertyValue::Bool)
            .ok_or_else(|| DmError::unsupported_value(value, ty)),
        PropertyType::String => match value {
            Value::String(s) => Ok(PropertyValue::String(s.clone())),
            Value::Number(n) => Ok(PropertyValue::String(n.to_string())),
            Value::Bool(b) => Ok(PropertyValue::String(b.to_string())),
            other => Err(DmError::unsupported_value(other, ty)),
        },
        PropertyType::Time | PropertyType::Date => match args {
            ValueArgs::Layout(layout) => parse_time(value, layout).map(PropertyValue::String),
            _ => Err(DmError::UnsupportedValueType(format!(
                "{} requires a layout format",
                ty
            ))),
        },
        PropertyType::Enum => match args {
            ValueArgs::Enum(enum_type) => parse_enum(value, enum_type),
            _ => Err(DmError::UnsupportedValueType("enum requires enumType".into())),
        },
        PropertyType::Array => match args {
            ValueArgs::Array(array_type) => parse_array(value, array_type),
            _ => Err(DmError::UnsupportedValueType("array requires arrayType".into())),
        },
        PropertyType::Object => match args {
            ValueArgs::Object(object_type) => parse_object(value, object_type),
            _ => Err(DmError::UnsupportedValueType("object requires objectType".into())),
        },
    }
}

/// Coerce a cloud-side JSON value into the type of `property`.
///
/// Numeric types accept JSON numbers only and are parsed from their decimal
/// text; the other types go through [`parse_value`] with the property's args.
pub fn parse_property_value(property: &DeviceProperty, value: &Value) -> DmResult<PropertyValue> {
    let ty = property.property_type;
    if !ty.is_numeric() {
        return parse_value(ty, value, ValueArgs::for_property(property));
    }

    let Value::Number(number) = value else {
        return Err(DmError::unsupported_value(value, ty));
    };
    let text = number.to_string();
    let invalid = |_| DmError::unsupported_value(&text, ty);
    Ok(match ty {
        PropertyType::Int16 => PropertyValue::Int16(text.parse().map_err(invalid)?),
        PropertyType::Int32 => PropertyValue::Int32(text.parse().map_err(invalid)?),
        PropertyType::Int64 => PropertyValue::Int64(text.parse().map_err(invalid)?),
        PropertyType::Float32 => {
            let v: f32 = text.parse().map_err(|_| DmError::unsupported_value(&text, ty))?;
            if !v.is_finite() {
                return Err(DmError::unsupported_value(&text, ty));
            }
            PropertyValue::Float32(v)
        }
        PropertyType::Float64 => {
            PropertyValue::Float64(text.parse().map_err(|_| DmError::unsupported_value(&text, ty))?)
        }
        _ => return Err(DmError::TypeNotSupported(ty.to_string())),
    })
}

/// Integers accept JSON integers, floats (truncated toward zero) and
/// integer strings.
fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            let f = n.as_f64()?.trunc();
            (f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Narrow to single precision, rejecting values outside its range.
pub(crate) fn narrow_f32(v: f64) -> Option<f32> {
    if !v.is_finite() || v.abs() > f32::MAX as f64 {
        return None;
    }
    Some(v as f32)
}

/// Output layouts keyed by their (case-insensitive) names.
fn output_layout(key: &str) -> Option<&'static str> {
    match key.trim().to_ascii_lowercase().as_str() {
        "yyyy-mm-dd" => Some("%Y-%m-%d"),
        "yyyy.mm.dd" => Some("%Y.%m.%d"),
        "yyyy/mm/dd" => Some("%Y/%m/%d"),
        "mm-dd-yyyy" => Some("%m-%d-%Y"),
        "hh:mm:ss" => Some("%H:%M:%S"),
        _ => None,
    }
}

const SOURCE_DATE_LAYOUTS: [&str; 3] = ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"];
const SOURCE_TIME_LAYOUTS: [&str; 3] = ["%H:%M:%S", "%H-%M-%S", "%H.%M.%S"];

fn parse_time(value: &Value, layout: &str) -> DmResult<String> {
    let format = output_layout(layout)
        .ok_or_else(|| DmError::UnsupportedValueType(format!("unknown time layout '{}'", layout)))?;

    let datetime = match value {
        Value::Number(_) => coerce_i64(value).and_then(from_timestamp),
        Value::String(s) => parse_time_text(s.trim()),
        _ => None,
    }
    .ok_or_else(|| DmError::unsupported_value(value, "time"))?;

    Ok(datetime.format(format).to_string())
}

fn from_timestamp(secs: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

fn parse_time_text(text: &str) -> Option<NaiveDateTime> {
    // Dates carry a four digit year, times are hh?mm?ss.
    if text.len() == 10 {
        for layout in SOURCE_DATE_LAYOUTS {
            if let Ok(date) = NaiveDate::parse_from_str(text, layout) {
                return date.and_hms_opt(0, 0, 0);
            }
        }
    }
    if text.len() == 8 {
        for layout in SOURCE_TIME_LAYOUTS {
            if let Ok(time) = NaiveTime::parse_from_str(text, layout) {
                return NaiveDate::from_ymd_opt(0, 1, 1).map(|date| date.and_time(time));
            }
        }
    }
    text.parse::<i64>().ok().and_then(from_timestamp)
}

fn parse_enum(value: &Value, enum_type: &EnumType) -> DmResult<PropertyValue> {
    let ty = enum_type.value_type;
    let input = parse_value(ty, value, ValueArgs::None)?;
    for candidate in &enum_type.values {
        match parse_value(ty, &candidate.value, ValueArgs::None) {
            Ok(parsed) if parsed == input => {
                return Ok(PropertyValue::String(candidate.name.clone()));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(
                    name = %candidate.name,
                    error = %e,
                    "Skipping enum value of wrong type"
                );
            }
        }
    }
    Err(DmError::UnsupportedValueType(format!(
        "{} matches no enum value",
        value
    )))
}

fn parse_array(value: &Value, array_type: &ArrayType) -> DmResult<PropertyValue> {
    let Value::Array(items) = value else {
        return Err(DmError::unsupported_value(value, PropertyType::Array));
    };
    if items.len() < array_type.min || items.len() > array_type.max {
        return Err(DmError::UnsupportedValueType(format!(
            "array length {} outside [{}, {}]",
            items.len(),
            array_type.min,
            array_type.max
        )));
    }
    let args = ValueArgs::layout(array_type.format.as_ref());
    items
        .iter()
        .map(|item| parse_value(array_type.element_type, item, args))
        .collect::<DmResult<Vec<_>>>()
        .map(PropertyValue::Array)
}

fn parse_object(
    value: &Value,
    object_type: &BTreeMap<String, ObjectType>,
) -> DmResult<PropertyValue> {
    let Value::Object(map) = value else {
        return Err(DmError::unsupported_value(value, PropertyType::Object));
    };
    let mut out = BTreeMap::new();
    for (key, schema) in object_type {
        if let Some(item) = map.get(key) {
            let parsed = parse_value(
                schema.value_type,
                item,
                ValueArgs::layout(schema.format.as_ref()),
            )?;
            out.insert(key.clone(), parsed);
        }
    }
    Ok(PropertyValue::Object(out))
}
