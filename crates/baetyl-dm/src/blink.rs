//! Blink envelope: the JSON wrapper exchanged on device topics.
//!
//! ```json
//! {"blink":{"reqId":"…","method":"thing.property.post","version":"1.0","timestamp":1700000000000,"properties":{…}}}
//! ```
//!
//! Each method fills exactly one of `properties`, `events` or `params`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{DmError, DmResult};

pub const BLINK_VERSION: &str = "1.0";

pub const METHOD_PROPERTY_INVOKE: &str = "thing.property.invoke";
pub const METHOD_PROPERTY_REPORT: &str = "thing.property.post";
pub const METHOD_EVENT_REPORT: &str = "thing.event.post";
pub const METHOD_PROPERTY_GET: &str = "thing.property.get";
pub const METHOD_LIFECYCLE_REPORT: &str = "thing.lifecycle.post";

/// Key of the lifecycle parameter.
pub const ONLINE_STATE: &str = "online_state";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blink {
    pub blink: BlinkData,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlinkData {
    #[serde(rename = "reqId", default)]
    pub req_id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub version: String,
    /// Unix milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl Blink {
    fn new(method: &str) -> Self {
        Self {
            blink: BlinkData {
                req_id: Uuid::new_v4().to_string(),
                method: method.to_string(),
                version: BLINK_VERSION.to_string(),
                timestamp: Utc::now().timestamp_millis(),
                ..BlinkData::default()
            },
        }
    }

    pub fn req_id(&self) -> &str {
        &self.blink.req_id
    }

    pub fn method(&self) -> &str {
        &self.blink.method
    }

    pub fn to_vec(&self) -> DmResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Southbound property write.
pub fn gen_property_invoke_blink_data(properties: Map<String, Value>) -> Blink {
    let mut blink = Blink::new(METHOD_PROPERTY_INVOKE);
    blink.blink.properties = Some(Value::Object(properties));
    blink
}

/// Northbound property report.
pub fn gen_property_report_blink_data(properties: Map<String, Value>) -> Blink {
    let mut blink = Blink::new(METHOD_PROPERTY_REPORT);
    blink.blink.properties = Some(Value::Object(properties));
    blink
}

pub fn gen_event_report_blink_data(events: Map<String, Value>) -> Blink {
    let mut blink = Blink::new(METHOD_EVENT_REPORT);
    blink.blink.events = Some(events);
    blink
}

/// Property read request for `keys`.
pub fn gen_property_get_blink_data(keys: &[String]) -> Blink {
    let mut blink = Blink::new(METHOD_PROPERTY_GET);
    blink.blink.properties = Some(Value::Array(
        keys.iter().cloned().map(Value::String).collect(),
    ));
    blink
}

pub fn gen_lifecycle_report_blink_data(online: bool) -> Blink {
    let mut params = Map::new();
    params.insert(ONLINE_STATE.to_string(), Value::Bool(online));
    let mut blink = Blink::new(METHOD_LIFECYCLE_REPORT);
    blink.blink.params = Some(params);
    blink
}

/// Decode an envelope; unknown fields are ignored.
pub fn parse_blink(payload: &[u8]) -> DmResult<Blink> {
    Ok(serde_json::from_slice(payload)?)
}

/// Typed key list of a `thing.property.get` request.
pub fn parse_property_keys(value: &Value) -> DmResult<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(DmError::InvalidPropertyKey(format!("expected a list, got {}", value)));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(key) => Ok(key.clone()),
            other => Err(DmError::InvalidPropertyKey(format!(
                "expected a string key, got {}",
                other
            ))),
        })
        .collect()
}
