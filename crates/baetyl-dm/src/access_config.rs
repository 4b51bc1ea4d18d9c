//! Protocol access configuration of a device.
//!
//! The content belongs to the protocol driver; the runtime only decides which
//! protocol the entry is for. Decoding is permissive by default: shapes it
//! does not understand leave the device without an access config instead of
//! failing the whole load. [`DecodeMode::Strict`] surfaces those cases.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{DmError, DmResult};

/// Protocol keys in precedence order.
const PROTOCOLS: [&str; 6] = ["modbus", "opcua", "opcda", "bacnet", "iec104", "custom"];

/// Access configuration of exactly one protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessConfig {
    Modbus(Value),
    Opcua(Value),
    Opcda(Value),
    Bacnet(Value),
    Iec104(Value),
    /// Raw content for drivers outside the built-in protocol set.
    Custom(Value),
}

/// How malformed access configs are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Unknown keys are ignored and malformed content yields `None`.
    #[default]
    Permissive,
    /// Malformed content, unknown keys and multiple protocols are errors.
    Strict,
}

impl AccessConfig {
    pub fn protocol(&self) -> &'static str {
        match self {
            Self::Modbus(_) => "modbus",
            Self::Opcua(_) => "opcua",
            Self::Opcda(_) => "opcda",
            Self::Bacnet(_) => "bacnet",
            Self::Iec104(_) => "iec104",
            Self::Custom(_) => "custom",
        }
    }

    pub fn content(&self) -> &Value {
        match self {
            Self::Modbus(v)
            | Self::Opcua(v)
            | Self::Opcda(v)
            | Self::Bacnet(v)
            | Self::Iec104(v)
            | Self::Custom(v) => v,
        }
    }

    fn from_protocol(protocol: &str, content: Value) -> Option<Self> {
        Some(match protocol {
            "modbus" => Self::Modbus(content),
            "opcua" => Self::Opcua(content),
            "opcda" => Self::Opcda(content),
            "bacnet" => Self::Bacnet(content),
            "iec104" => Self::Iec104(content),
            "custom" => Self::Custom(content),
            _ => return None,
        })
    }

    /// Decode a raw `accessConfig` value.
    ///
    /// `path` names the device in error messages.
    pub fn decode(raw: &Value, mode: DecodeMode, path: &str) -> DmResult<Option<Self>> {
        let strict = mode == DecodeMode::Strict;
        let map = match raw {
            Value::Null => return Ok(None),
            Value::Object(map) => map,
            other if strict => {
                return Err(DmError::malformed(
                    path,
                    format!("accessConfig must be a mapping, got {}", other),
                ));
            }
            _ => return Ok(None),
        };

        if strict {
            check_strict(map, path)?;
        }

        let found = PROTOCOLS
            .iter()
            .find_map(|p| map.get(*p).filter(|v| !v.is_null()).map(|v| (*p, v.clone())));
        Ok(found.and_then(|(protocol, content)| Self::from_protocol(protocol, content)))
    }
}

fn check_strict(map: &Map<String, Value>, path: &str) -> DmResult<()> {
    if let Some(unknown) = map.keys().find(|k| !PROTOCOLS.contains(&k.as_str())) {
        return Err(DmError::malformed(
            path,
            format!("unknown accessConfig protocol '{}'", unknown),
        ));
    }
    let present: Vec<&str> = PROTOCOLS
        .iter()
        .copied()
        .filter(|p| map.get(*p).is_some_and(|v| !v.is_null()))
        .collect();
    if present.len() > 1 {
        return Err(DmError::malformed(
            path,
            format!("accessConfig sets several protocols: {}", present.join(", ")),
        ));
    }
    Ok(())
}

impl Serialize for AccessConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = Map::new();
        map.insert(self.protocol().to_string(), self.content().clone());
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AccessConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        AccessConfig::decode(&raw, DecodeMode::Strict, "accessConfig")
            .map_err(serde::de::Error::custom)?
            .ok_or_else(|| serde::de::Error::custom("accessConfig sets no protocol"))
    }
}

/// Field deserializer used by `DeviceInfo`: never fails on content it cannot
/// interpret, the device simply gets no access config.
pub fn deserialize_permissive<'de, D>(deserializer: D) -> Result<Option<AccessConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Value::deserialize(deserializer) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable accessConfig");
            return Ok(None);
        }
    };
    Ok(AccessConfig::decode(&raw, DecodeMode::Permissive, "accessConfig").unwrap_or(None))
}
