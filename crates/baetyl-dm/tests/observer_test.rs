//! Inbound routing from MQTT publishes to device mailboxes.

mod common;

use std::time::{Duration, Instant};

use baetyl_core::mqtt::Observer;
use baetyl_dm::{DeviceMessage, DmContext, DriverSettings};
use common::*;
use serde_json::{json, Value};

#[tokio::test]
async fn test_delta_reaches_device_mailbox() {
    let (ctx, _dir) = loaded_context();
    ctx.attach_link(MemoryLink::new());
    let mut mailboxes = ctx.subscribe(DRIVER).await.unwrap();
    let observer = ctx.observer();

    observer
        .on_publish("$baetyl/device/boiler-1/delta", br#"{"p1":1}"#)
        .unwrap();

    let mailbox = mailboxes.iter_mut().find(|m| m.device() == "boiler-1").unwrap();
    match mailbox.recv().await {
        Some(DeviceMessage::Delta(delta)) => {
            assert_eq!(delta.device, "boiler-1");
            assert_eq!(Value::Object(delta.properties), json!({"p1": 1}));
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[tokio::test]
async fn test_messages_keep_arrival_order_per_device() {
    let (ctx, _dir) = loaded_context();
    ctx.attach_link(MemoryLink::new());
    let mut mailboxes = ctx.subscribe(DRIVER).await.unwrap();
    let observer = ctx.observer();

    observer
        .on_publish("$baetyl/device/boiler-2/event", br#"{"type":"report"}"#)
        .unwrap();
    observer
        .on_publish(
            "$baetyl/device/boiler-2/getResponse",
            br#"{"name":"boiler-2","report":{"temperature":20.5}}"#,
        )
        .unwrap();

    let mailbox = mailboxes.iter_mut().find(|m| m.device() == "boiler-2").unwrap();
    assert!(matches!(
        mailbox.recv().await,
        Some(DeviceMessage::Event(e)) if e.event.kind == "report"
    ));
    assert!(matches!(
        mailbox.recv().await,
        Some(DeviceMessage::Response(r)) if r.shadow.report["temperature"] == 20.5
    ));
}

#[tokio::test]
async fn test_full_mailbox_returns_promptly() {
    let dir = driver_dir();
    let settings = DriverSettings {
        mailbox_capacity: 1,
        ..DriverSettings::default()
    };
    let ctx = DmContext::with_settings(service(), &settings);
    ctx.load_driver_config(dir.path(), DRIVER).unwrap();
    ctx.attach_link(MemoryLink::new());
    let mut mailboxes = ctx.subscribe(DRIVER).await.unwrap();
    let observer = ctx.observer();

    observer
        .on_publish("$baetyl/device/boiler-1/delta", br#"{"seq":1}"#)
        .unwrap();

    let started = Instant::now();
    for seq in 2..100 {
        let payload = format!(r#"{{"seq":{}}}"#, seq);
        observer
            .on_publish("$baetyl/device/boiler-1/delta", payload.as_bytes())
            .unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    let mailbox = mailboxes.iter_mut().find(|m| m.device() == "boiler-1").unwrap();
    match mailbox.recv().await {
        Some(DeviceMessage::Delta(delta)) => assert_eq!(delta.properties["seq"], 1),
        other => panic!("unexpected message {:?}", other),
    }
    assert!(mailbox.try_recv().is_none());
}

#[tokio::test]
async fn test_bad_payloads_are_dropped() {
    let (ctx, _dir) = loaded_context();
    ctx.attach_link(MemoryLink::new());
    let mut mailboxes = ctx.subscribe(DRIVER).await.unwrap();
    let observer = ctx.observer();

    for (topic, payload) in [
        ("$baetyl/device/boiler-1/delta", &b"[1]"[..]),
        ("$baetyl/device/boiler-1/event", &b"{}"[..]),
        ("$baetyl/device/boiler-1/report", &b"{}"[..]),
        ("$baetyl/device/ghost/delta", &b"{}"[..]),
        ("not/a/device/topic", &b"{}"[..]),
    ] {
        assert!(observer.on_publish(topic, payload).is_ok(), "{}", topic);
    }

    for mailbox in mailboxes.iter_mut() {
        assert!(mailbox.try_recv().is_none(), "{}", mailbox.device());
    }
}

#[tokio::test]
async fn test_custom_topic_reaches_device_mailbox() {
    let (ctx, _dir) = loaded_context();
    let link = MemoryLink::new();
    ctx.attach_link(link.clone());
    let mut mailboxes = ctx.subscribe(DRIVER).await.unwrap();
    assert!(link
        .subscribed
        .lock()
        .iter()
        .any(|s| s.topic == "plant/boiler-2/delta"));
    let observer = ctx.observer();

    observer
        .on_publish("plant/boiler-2/delta", br#"{"pressure":3}"#)
        .unwrap();
    observer
        .on_publish(
            "plant/boiler-2/getResponse",
            br#"{"name":"boiler-2","report":{"pressure":3}}"#,
        )
        .unwrap();

    let mailbox = mailboxes.iter_mut().find(|m| m.device() == "boiler-2").unwrap();
    match mailbox.recv().await {
        Some(DeviceMessage::Delta(delta)) => {
            assert_eq!(delta.device, "boiler-2");
            assert_eq!(Value::Object(delta.properties), json!({"pressure": 3}));
        }
        other => panic!("unexpected message {:?}", other),
    }
    assert!(matches!(
        mailbox.recv().await,
        Some(DeviceMessage::Response(r)) if r.device == "boiler-2"
    ));
}

#[tokio::test]
async fn test_delta_with_blink_property_is_delivered() {
    let (ctx, _dir) = loaded_context();
    ctx.attach_link(MemoryLink::new());
    let mut mailboxes = ctx.subscribe(DRIVER).await.unwrap();
    let observer = ctx.observer();

    observer
        .on_publish("$baetyl/device/boiler-1/delta", br#"{"blink":1,"p1":2}"#)
        .unwrap();

    let mailbox = mailboxes.iter_mut().find(|m| m.device() == "boiler-1").unwrap();
    match mailbox.try_recv() {
        Some(DeviceMessage::Delta(delta)) => {
            assert_eq!(Value::Object(delta.properties), json!({"blink": 1, "p1": 2}));
        }
        other => panic!("unexpected message {:?}", other),
    }
}
