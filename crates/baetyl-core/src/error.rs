//! Unified error handling for the Baetyl service host.
//!
//! Every fallible operation of this crate returns [`Result`]. Variants carry
//! rendered messages so the error stays `Clone` and can be fanned out to
//! observers without borrowing the original cause.

/// Error type for the service host and the MQTT boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A configuration file does not exist.
    #[error("Configuration not found: {0}")]
    ConfigNotFound(String),

    /// Configuration is present but invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// MQTT client or transport errors.
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// File system errors.
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The service was asked to stop.
    #[error("Service is shutting down")]
    Shutdown,

    /// Generic internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Convenience macros for creating errors.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! mqtt_err {
    ($msg:expr) => {
        $crate::error::Error::Mqtt($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Mqtt(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = config_err!("bad address {}", "tcp://");
        assert_eq!(err.to_string(), "Configuration error: bad address tcp://");

        let err = mqtt_err!("connection refused");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(msg) if msg.contains("denied")));
    }
}
