//! Messages delivered to driver mailboxes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw property values keyed by property name or ID.
pub type DeviceProperties = Map<String, Value>;

/// Event type asking the driver to report its current properties.
pub const EVENT_TYPE_REPORT: &str = "report";

/// Cloud-side view of a device returned on `getResponse`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceShadow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub report: DeviceProperties,
    #[serde(default)]
    pub desire: DeviceProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaMessage {
    pub device: String,
    pub properties: DeviceProperties,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub device: String,
    pub shadow: DeviceShadow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub device: String,
    pub event: DeviceEvent,
}

/// A message waiting in a device mailbox.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Delta(DeltaMessage),
    Response(ResponseMessage),
    Event(EventMessage),
}

impl DeviceMessage {
    pub fn device(&self) -> &str {
        match self {
            Self::Delta(m) => &m.device,
            Self::Response(m) => &m.device,
            Self::Event(m) => &m.device,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delta(_) => "delta",
            Self::Response(_) => "getResponse",
            Self::Event(_) => "event",
        }
    }
}
