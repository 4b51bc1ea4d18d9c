//! Loopback driver: answers every device message from the broker itself.
//!
//! Deltas are normalized against the device model and reported back as the
//! new device state. A `report` event asks for the shadow, and the shadow's
//! reported section is published again once it arrives.

use std::sync::Arc;

use anyhow::Result;
use baetyl_core::{MqttClient, ServiceContext};
use baetyl_dm::message::EVENT_TYPE_REPORT;
use baetyl_dm::{DeltaMessage, DeviceMessage, DmConfig, DmContext, DmResult, Mailbox};
use serde_json::Map;
use tracing::{debug, info, warn};

pub async fn serve(service: ServiceContext, driver: String) -> Result<()> {
    let config: DmConfig = service.load_config_or_default()?;
    let ctx = Arc::new(DmContext::with_settings(service, &config.driver));
    ctx.load_driver_config(&config.driver.config_dir, &driver)?;

    let client = Arc::new(MqttClient::connect(&config.mqtt, ctx.observer())?);
    ctx.attach_link(client.clone());

    let mailboxes = ctx.subscribe(&driver).await?;
    let devices = ctx.get_all_devices(&driver);
    for device in &devices {
        if let Err(e) = ctx.online(&driver, &device.name).await {
            warn!(device = %device.name, error = %e, "Failed to report online");
        }
    }
    info!(driver = %driver, devices = devices.len(), "Loopback driver running");

    let tasks: Vec<_> = mailboxes
        .into_iter()
        .map(|mailbox| tokio::spawn(handle_mailbox(ctx.clone(), driver.clone(), mailbox)))
        .collect();

    ctx.wait().await;

    for device in &devices {
        if let Err(e) = ctx.offline(&driver, &device.name).await {
            warn!(device = %device.name, error = %e, "Failed to report offline");
        }
    }
    ctx.close();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Mailbox task failed");
        }
    }
    client.close().await;
    Ok(())
}

async fn handle_mailbox(ctx: Arc<DmContext>, driver: String, mut mailbox: Mailbox) {
    while let Some(message) = mailbox.recv().await {
        let device = message.device().to_string();
        let kind = message.kind();
        if let Err(e) = handle_message(&ctx, &driver, message).await {
            warn!(device = %device, kind, error = %e, "Failed to handle device message");
        }
    }
    debug!(device = %mailbox.device(), "Mailbox closed");
}

async fn handle_message(ctx: &DmContext, driver: &str, message: DeviceMessage) -> DmResult<()> {
    match message {
        DeviceMessage::Delta(delta) => report_delta(ctx, driver, delta).await,
        DeviceMessage::Event(event) if event.event.kind == EVENT_TYPE_REPORT => {
            ctx.get_device_shadow(driver, &event.device).await
        }
        DeviceMessage::Event(event) => {
            debug!(device = %event.device, kind = %event.event.kind, "Ignoring event");
            Ok(())
        }
        DeviceMessage::Response(response) => {
            ctx.report_device_properties(driver, &response.device, response.shadow.report)
                .await
        }
    }
}

async fn report_delta(ctx: &DmContext, driver: &str, delta: DeltaMessage) -> DmResult<()> {
    let values = ctx.parse_property_values(driver, &delta.device, &delta.properties)?;
    let props: Map<_, _> = values
        .into_iter()
        .map(|(name, value)| (name, value.to_json()))
        .collect();
    ctx.report_device_properties(driver, &delta.device, props).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use baetyl_core::mqtt::{MqttLink, Observer, Qos, Subscription};
    use baetyl_core::RunMode;
    use baetyl_dm::{DeviceEvent, DeviceShadow, EventMessage, ResponseMessage};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    const DRIVER: &str = "loopback";

    const SUB_DEVICES: &str = r#"
driver: loopback
devices:
  - name: pump-1
    deviceModel: pump
    accessTemplate: pump-raw
"#;

    const MODELS: &str = r#"
pump:
  - id: "1"
    name: speed
    type: float32
    mode: rw
  - id: "2"
    name: running
    type: bool
    mode: rw
"#;

    const TEMPLATES: &str = r#"
pump-raw:
  properties:
    - id: "1"
      name: raw-speed
      type: float32
"#;

    #[derive(Default)]
    struct RecordingLink {
        published: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl MqttLink for RecordingLink {
        async fn publish(
            &self,
            topic: &str,
            _qos: Qos,
            payload: Vec<u8>,
        ) -> baetyl_core::Result<()> {
            let payload = serde_json::from_slice(&payload)?;
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }

        async fn subscribe(&self, _subscriptions: &[Subscription]) -> baetyl_core::Result<()> {
            Ok(())
        }

        async fn unsubscribe(&self, _topics: &[String]) -> baetyl_core::Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<DmContext>, Arc<RecordingLink>, TempDir) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sub_devices.yml"), SUB_DEVICES).unwrap();
        std::fs::write(dir.path().join("models.yml"), MODELS).unwrap();
        std::fs::write(dir.path().join("access_template.yml"), TEMPLATES).unwrap();

        let service = ServiceContext::new("loopback", RunMode::Native, "/tmp", "/nonexistent");
        let ctx = Arc::new(DmContext::new(service));
        ctx.load_driver_config(dir.path(), DRIVER).unwrap();
        let link = Arc::new(RecordingLink::default());
        ctx.attach_link(link.clone());
        (ctx, link, dir)
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    fn delta(properties: Value) -> DeviceMessage {
        DeviceMessage::Delta(DeltaMessage {
            device: "pump-1".into(),
            properties: object(properties),
        })
    }

    fn event(kind: &str) -> DeviceMessage {
        DeviceMessage::Event(EventMessage {
            device: "pump-1".into(),
            event: DeviceEvent {
                kind: kind.into(),
                payload: Value::Null,
            },
        })
    }

    #[tokio::test]
    async fn test_delta_is_normalized_and_reported() {
        let (ctx, link, _dir) = setup();
        handle_message(&ctx, DRIVER, delta(json!({"speed": 12.5, "running": true})))
            .await
            .unwrap();

        let published = link.published.lock().clone();
        assert_eq!(published.len(), 1);
        let (topic, payload) = &published[0];
        assert_eq!(topic, "$baetyl/device/pump-1/report");
        assert_eq!(payload["blink"]["method"], "thing.property.post");
        assert_eq!(payload["blink"]["properties"], json!({"speed": 12.5, "running": true}));
    }

    #[tokio::test]
    async fn test_bad_delta_publishes_nothing() {
        let (ctx, link, _dir) = setup();
        let err = handle_message(&ctx, DRIVER, delta(json!({"speed": "fast"})))
            .await
            .unwrap_err();
        assert!(matches!(err, baetyl_dm::DmError::UnsupportedValueType(_)));

        let err = handle_message(&ctx, DRIVER, delta(json!({"pressure": 1})))
            .await
            .unwrap_err();
        assert_eq!(err, baetyl_dm::DmError::PropsConfigNotExist("pressure".into()));
        assert!(link.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_report_event_requests_shadow() {
        let (ctx, link, _dir) = setup();
        handle_message(&ctx, DRIVER, event("report")).await.unwrap();
        handle_message(&ctx, DRIVER, event("reboot")).await.unwrap();

        let published = link.published.lock().clone();
        assert_eq!(
            published,
            vec![("$baetyl/device/pump-1/get".to_string(), json!({}))]
        );
    }

    #[tokio::test]
    async fn test_shadow_response_is_reported_back() {
        let (ctx, link, _dir) = setup();
        let response = DeviceMessage::Response(ResponseMessage {
            device: "pump-1".into(),
            shadow: DeviceShadow {
                name: "pump-1".into(),
                report: object(json!({"speed": 7.0})),
                ..DeviceShadow::default()
            },
        });
        handle_message(&ctx, DRIVER, response).await.unwrap();

        let (topic, payload) = link.published.lock().last().cloned().unwrap();
        assert_eq!(topic, "$baetyl/device/pump-1/report");
        assert_eq!(payload["blink"]["method"], "thing.property.post");
        assert_eq!(payload["blink"]["properties"], json!({"speed": 7.0}));
    }

    #[tokio::test]
    async fn test_mailbox_task_answers_until_closed() {
        let (ctx, link, _dir) = setup();
        let mut mailboxes = ctx.subscribe(DRIVER).await.unwrap();
        let task = tokio::spawn(handle_mailbox(
            ctx.clone(),
            DRIVER.to_string(),
            mailboxes.remove(0),
        ));

        let observer = ctx.observer();
        observer
            .on_publish("$baetyl/device/pump-1/delta", br#"{"running":false}"#)
            .unwrap();
        ctx.close();
        task.await.unwrap();

        let published = link.published.lock().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1["blink"]["properties"], json!({"running": false}));
    }
}
