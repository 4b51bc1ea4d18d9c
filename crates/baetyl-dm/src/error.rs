//! Error type of the device-management runtime.

use thiserror::Error;

/// Result type for device-management operations.
pub type DmResult<T> = Result<T, DmError>;

/// Errors surfaced by the device-management runtime.
///
/// Lookup misses and value faults are returned to the calling driver; the
/// MQTT observer only logs them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DmError {
    /// A required driver file is missing.
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    /// A driver file exists but cannot be parsed or fails validation.
    #[error("config malformed: {path}: {message}")]
    ConfigMalformed { path: String, message: String },

    #[error("device not exist: {0}")]
    DeviceNotExist(String),

    #[error("device model not exist: {0}")]
    DeviceModelNotExist(String),

    #[error("access template not exist: {0}")]
    AccessTemplateNotExist(String),

    /// No model property carries the given name.
    #[error("property config not exist: {0}")]
    PropsConfigNotExist(String),

    #[error("type not supported: {0}")]
    TypeNotSupported(String),

    /// A value cannot be coerced into the declared type.
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("invalid expression args: {0}")]
    InvalidExpressionArgs(String),

    #[error("unknown expression method: {0}")]
    UnknownExpressionMethod(String),

    /// The requested result type cannot hold a numeric mapping result.
    #[error("unsupported arg type: {0}")]
    UnsupportedArgType(String),

    #[error("divisor is zero")]
    DivisorZero,

    #[error("invalid property key: {0}")]
    InvalidPropertyKey(String),

    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    #[error("unknown property id: {0}")]
    UnknownPropertyId(String),

    #[error("config id not exist: {0}")]
    ConfigIdNotExist(String),

    #[error("property value not exist: {0}")]
    PropertyValueNotExist(String),

    /// Publishing or subscribing on the broker failed.
    #[error(transparent)]
    Mqtt(#[from] baetyl_core::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DmError {
    fn from(err: serde_json::Error) -> Self {
        DmError::Serialization(err.to_string())
    }
}

impl DmError {
    pub(crate) fn malformed(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        DmError::ConfigMalformed {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn unsupported_value(
        value: impl std::fmt::Display,
        ty: impl std::fmt::Display,
    ) -> Self {
        DmError::UnsupportedValueType(format!("{} as {}", value, ty))
    }

    /// Lookup misses: well-formed requests for names that are not configured.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DmError::DeviceNotExist(_)
                | DmError::DeviceModelNotExist(_)
                | DmError::AccessTemplateNotExist(_)
                | DmError::PropsConfigNotExist(_)
        )
    }
}
