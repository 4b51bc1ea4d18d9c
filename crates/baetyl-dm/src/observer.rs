//! MQTT observer routing inbound device topics to mailboxes.

use std::sync::Arc;

use baetyl_core::mqtt::Observer;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::blink::BlinkData;
use crate::error::{DmError, DmResult};
use crate::mailbox::{MailboxRegistry, Offer};
use crate::message::{
    DeltaMessage, DeviceEvent, DeviceMessage, DeviceProperties, DeviceShadow, EventMessage,
    ResponseMessage,
};
use crate::topic::{parse_topic, TopicKind};

/// Decode an inbound PUBLISH on a `$baetyl/device/<device>/<kind>` topic.
///
/// `Ok(None)` means the topic is not one the runtime dispatches.
pub fn decode_message(topic: &str, payload: &[u8]) -> DmResult<Option<DeviceMessage>> {
    let Some((device, kind)) = parse_topic(topic) else {
        return Ok(None);
    };
    match TopicKind::parse(kind) {
        Some(kind) => decode_for(device, kind, payload),
        None => Ok(None),
    }
}

/// Decode `payload` as a message of `kind` for `device`.
fn decode_for(device: &str, kind: TopicKind, payload: &[u8]) -> DmResult<Option<DeviceMessage>> {
    let device = device.to_string();
    let message = match kind {
        TopicKind::Delta => DeviceMessage::Delta(DeltaMessage {
            device,
            properties: decode_delta(payload)?,
        }),
        TopicKind::GetResponse => {
            let shadow: DeviceShadow = serde_json::from_slice(payload)?;
            DeviceMessage::Response(ResponseMessage { device, shadow })
        }
        TopicKind::Event => {
            let event: DeviceEvent = serde_json::from_slice(payload)?;
            DeviceMessage::Event(EventMessage { device, event })
        }
        _ => return Ok(None),
    };
    Ok(Some(message))
}

/// A delta is a property map, either bare or as `blink.properties`.
///
/// Only a `blink` object carrying a `method` is an envelope; any other
/// `blink` entry is an ordinary property.
fn decode_delta(payload: &[u8]) -> DmResult<DeviceProperties> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| DmError::InvalidDelta(e.to_string()))?;
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(DmError::InvalidDelta(format!("expected an object, got {}", other)));
        }
    };
    let is_envelope = map
        .get("blink")
        .and_then(Value::as_object)
        .is_some_and(|blink| blink.get("method").is_some_and(Value::is_string));
    if !is_envelope {
        return Ok(map);
    }

    let inner = map.remove("blink").unwrap_or_default();
    let data: BlinkData =
        serde_json::from_value(inner).map_err(|e| DmError::InvalidDelta(e.to_string()))?;
    match data.properties {
        Some(Value::Object(properties)) => Ok(properties),
        other => Err(DmError::InvalidDelta(format!(
            "blink properties must be an object, got {}",
            other.unwrap_or(Value::Null)
        ))),
    }
}

/// Observer installed on the MQTT client of a device-management context.
///
/// Never fails the transport: undecodable messages are logged and dropped.
pub struct DeviceObserver {
    mailboxes: Arc<MailboxRegistry>,
}

impl DeviceObserver {
    pub(crate) fn new(mailboxes: Arc<MailboxRegistry>) -> Self {
        Self { mailboxes }
    }
}

impl Observer for DeviceObserver {
    fn on_publish(&self, topic: &str, payload: &[u8]) -> baetyl_core::Result<()> {
        let decoded = match self.mailboxes.resolve(topic) {
            Some((device, kind)) => decode_for(&device, kind, payload),
            None => decode_message(topic, payload),
        };
        match decoded {
            Ok(Some(message)) => {
                if self.mailboxes.offer(message) == Offer::Delivered {
                    debug!(topic = %topic, "Dispatched device message");
                }
            }
            Ok(None) => {
                warn!(topic = %topic, "Dropping message on unhandled topic");
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "Dropping undecodable device message");
            }
        }
        Ok(())
    }

    fn on_puback(&self, pkid: u16) {
        debug!(pkid, "Publish acknowledged");
    }

    fn on_error(&self, err: &baetyl_core::Error) {
        warn!(error = %err, "MQTT transport error");
    }
}
