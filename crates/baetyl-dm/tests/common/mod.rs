//! Shared fixtures: driver files on disk and an in-memory MQTT link.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use baetyl_core::mqtt::{MqttLink, Qos, Subscription};
use baetyl_core::{RunMode, ServiceContext};
use baetyl_dm::DmContext;
use parking_lot::Mutex;
use tempfile::TempDir;

pub const DRIVER: &str = "modbus";

pub const SUB_DEVICES: &str = r#"
driver: modbus
devices:
  - name: boiler-1
    version: "1"
    deviceModel: boiler
    accessTemplate: boiler-modbus
    accessConfig:
      modbus:
        id: 1
        interval: 5s
  - name: boiler-2
    deviceModel: boiler
    accessTemplate: boiler-modbus
    deviceTopic:
      delta: { topic: plant/boiler-2/delta, qos: 1 }
      report: { topic: plant/boiler-2/report, qos: 0 }
      event: { topic: plant/boiler-2/event, qos: 0 }
      get: { topic: plant/boiler-2/get, qos: 0 }
      getResponse: { topic: plant/boiler-2/getResponse, qos: 0 }
      eventReport: { topic: plant/boiler-2/eventReport, qos: 0 }
      propertyGet: { topic: plant/boiler-2/propertyGet, qos: 0 }
      lifecycleReport: { topic: plant/boiler-2/lifecycleReport, qos: 0 }
"#;

pub const MODELS: &str = r#"
boiler:
  - id: "1"
    name: temperature
    type: float32
    mode: ro
    unit: "°C"
  - id: "2"
    name: pressure
    type: int16
    mode: rw
  - id: "3"
    name: enabled
    type: bool
    mode: rw
  - id: "4"
    name: level
    type: enum
    mode: rw
    enumType:
      type: int32
      values:
        - { name: low, value: 1, displayName: Low }
        - { name: high, value: 2, displayName: High }
  - id: "5"
    name: samples
    type: array
    mode: ro
    arrayType:
      type: int32
      min: 1
      max: 3
  - id: "6"
    name: serviced
    type: date
    mode: rw
    format: yyyy-mm-dd
  - id: "7"
    name: position
    type: object
    mode: ro
    objectType:
      lat: { type: float64 }
      lon: { type: float64 }
"#;

pub const TEMPLATES: &str = r#"
boiler-modbus:
  version: "1"
  properties:
    - id: "1"
      name: raw-temperature
      type: float32
      visitor:
        modbus: { function: 3, address: "0x1", quantity: 1 }
    - id: "2"
      name: raw-pressure
      type: int16
  mappings:
    - attribute: temperature
      type: calculate
      expression: ratio(x1,10)
      precision: 1
    - attribute: pressure
      type: value
      expression: x2
"#;

pub fn write_driver_files(sub_devices: &str, models: &str, templates: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("sub_devices.yml"), sub_devices).unwrap();
    std::fs::write(dir.path().join("models.yml"), models).unwrap();
    std::fs::write(dir.path().join("access_template.yml"), templates).unwrap();
    dir
}

pub fn driver_dir() -> TempDir {
    write_driver_files(SUB_DEVICES, MODELS, TEMPLATES)
}

pub fn service() -> ServiceContext {
    ServiceContext::new("test-driver", RunMode::Native, "/tmp", "/nonexistent/conf.yml")
}

/// Context with the fixture driver loaded.
pub fn loaded_context() -> (DmContext, TempDir) {
    let dir = driver_dir();
    let ctx = DmContext::new(service());
    ctx.load_driver_config(dir.path(), DRIVER).unwrap();
    (ctx, dir)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub qos: Qos,
    pub payload: serde_json::Value,
}

/// Records every operation instead of talking to a broker.
#[derive(Default)]
pub struct MemoryLink {
    pub published: Mutex<Vec<Published>>,
    pub subscribed: Mutex<Vec<Subscription>>,
}

impl MemoryLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn last(&self) -> Published {
        self.published.lock().last().cloned().expect("nothing published")
    }
}

#[async_trait]
impl MqttLink for MemoryLink {
    async fn publish(&self, topic: &str, qos: Qos, payload: Vec<u8>) -> baetyl_core::Result<()> {
        let payload = serde_json::from_slice(&payload)
            .map_err(|e| baetyl_core::Error::Serialization(e.to_string()))?;
        self.published.lock().push(Published {
            topic: topic.to_string(),
            qos,
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, subscriptions: &[Subscription]) -> baetyl_core::Result<()> {
        self.subscribed.lock().extend_from_slice(subscriptions);
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> baetyl_core::Result<()> {
        self.subscribed.lock().retain(|s| !topics.contains(&s.topic));
        Ok(())
    }
}
