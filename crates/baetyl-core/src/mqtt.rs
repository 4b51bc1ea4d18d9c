//! MQTT client boundary.
//!
//! Drivers talk to the local broker through two seams:
//! - [`MqttLink`]: publish/subscribe operations, implemented by [`MqttClient`]
//!   and by in-memory fakes in tests.
//! - [`Observer`]: callbacks invoked from the single reader task that drives
//!   the `rumqttc` event loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::{config_err, mqtt_err};

const DEFAULT_PORT: u16 = 1883;
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Delivery guarantee of a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            other => Err(format!("unsupported qos {}, expected 0 or 1", other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
        }
    }
}

impl From<Qos> for QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
        }
    }
}

/// A topic filter with its requested qos.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    #[serde(default)]
    pub qos: Qos,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: Qos) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

/// Callbacks from the MQTT reader task.
///
/// Implementations run on the hot path of the connection and must not block.
pub trait Observer: Send + Sync {
    /// An application message arrived.
    fn on_publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// The broker acknowledged a qos 1 publish.
    fn on_puback(&self, _pkid: u16) {}

    /// The transport reported an error.
    fn on_error(&self, _err: &Error) {}
}

/// Publish/subscribe operations consumed by drivers.
#[async_trait]
pub trait MqttLink: Send + Sync {
    async fn publish(&self, topic: &str, qos: Qos, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<()>;

    async fn unsubscribe(&self, topics: &[String]) -> Result<()>;
}

/// The `mqtt` section of a service config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttClientConfig {
    /// Broker address, `tcp://host:port` or `host:port`.
    #[serde(default = "default_address")]
    pub address: String,
    /// Client ID (auto-generated if not provided)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clientid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
    #[serde(default = "default_clean_session")]
    pub cleansession: bool,
    /// Capacity of the request queue between the client handle and the event loop.
    #[serde(rename = "maxCacheMessages", default = "default_max_cache_messages")]
    pub max_cache_messages: usize,
    /// Consecutive transport errors tolerated before the event loop gives up.
    #[serde(rename = "maxErrors", default = "default_max_errors")]
    pub max_errors: u32,
}

fn default_address() -> String {
    format!("tcp://127.0.0.1:{}", DEFAULT_PORT)
}
fn default_keepalive() -> u64 {
    30
}
fn default_clean_session() -> bool {
    true
}
fn default_max_cache_messages() -> usize {
    64
}
fn default_max_errors() -> u32 {
    5
}

impl Default for MqttClientConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            clientid: None,
            username: None,
            password: None,
            keepalive: default_keepalive(),
            cleansession: default_clean_session(),
            max_cache_messages: default_max_cache_messages(),
            max_errors: default_max_errors(),
        }
    }
}

impl MqttClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.clientid = Some(client_id.into());
        self
    }

    /// Split the address into host and port.
    ///
    /// Only plain TCP is supported; TLS material is owned by the PKI helpers.
    pub fn host_port(&self) -> Result<(String, u16)> {
        let address = self.address.trim();
        let rest = if let Some(rest) = address.strip_prefix("tcp://") {
            rest
        } else if let Some(rest) = address.strip_prefix("mqtt://") {
            rest
        } else if address.contains("://") {
            return Err(config_err!("unsupported mqtt address scheme: {}", address));
        } else {
            address
        };

        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Err(config_err!("empty mqtt address"));
        }

        match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| config_err!("invalid mqtt port in address: {}", address))?;
                if host.is_empty() {
                    return Err(config_err!("missing mqtt host in address: {}", address));
                }
                Ok((host.to_string(), port))
            }
            None => Ok((rest.to_string(), DEFAULT_PORT)),
        }
    }

    fn options(&self) -> Result<MqttOptions> {
        let (host, port) = self.host_port()?;
        let client_id = self
            .clientid
            .clone()
            .unwrap_or_else(|| format!("baetyl-{}", Uuid::new_v4()));

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(self.keepalive.max(MIN_KEEP_ALIVE_SECS)));
        options.set_clean_session(self.cleansession);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        Ok(options)
    }
}

/// MQTT client backed by `rumqttc`.
///
/// The event loop runs on its own task and feeds the observer. Subscriptions
/// are remembered and replayed after a reconnect without a persistent session.
pub struct MqttClient {
    client: AsyncClient,
    running: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<HashMap<String, Qos>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// Create the client and spawn its event loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: &MqttClientConfig, observer: Arc<dyn Observer>) -> Result<Self> {
        let options = config.options()?;
        let (client, eventloop) = AsyncClient::new(options, config.max_cache_messages.max(1));

        let running = Arc::new(AtomicBool::new(true));
        let subscriptions = Arc::new(Mutex::new(HashMap::new()));

        let task = tokio::spawn(drive(
            eventloop,
            client.clone(),
            observer,
            running.clone(),
            subscriptions.clone(),
            config.max_errors.max(1),
        ));

        info!(address = %config.address, "MQTT client started");
        Ok(Self {
            client,
            running,
            subscriptions,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Disconnect and stop the event loop.
    pub async fn close(&self) {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        info!("MQTT client closed");
    }
}

#[async_trait]
impl MqttLink for MqttClient {
    async fn publish(&self, topic: &str, qos: Qos, payload: Vec<u8>) -> Result<()> {
        if !self.is_running() {
            return Err(Error::Shutdown);
        }
        self.client
            .publish(topic, qos.into(), false, payload)
            .await
            .map_err(|e| mqtt_err!("publish to {} failed: {}", topic, e))
    }

    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<()> {
        for sub in subscriptions {
            self.client
                .subscribe(sub.topic.as_str(), sub.qos.into())
                .await
                .map_err(|e| mqtt_err!("subscribe to {} failed: {}", sub.topic, e))?;
            self.subscriptions.lock().insert(sub.topic.clone(), sub.qos);
            debug!(topic = %sub.topic, qos = u8::from(sub.qos), "Subscribed");
        }
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<()> {
        for topic in topics {
            self.client
                .unsubscribe(topic.as_str())
                .await
                .map_err(|e| mqtt_err!("unsubscribe from {} failed: {}", topic, e))?;
            self.subscriptions.lock().remove(topic);
        }
        Ok(())
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    observer: Arc<dyn Observer>,
    running: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<HashMap<String, Qos>>>,
    max_errors: u32,
) {
    let mut error_count = 0;
    let mut connected_once = false;

    while running.load(Ordering::Acquire) {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                error_count = 0;
                if let Err(e) = observer.on_publish(&publish.topic, &publish.payload) {
                    warn!(topic = %publish.topic, error = %e, "Observer rejected message");
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => observer.on_puback(ack.pkid),
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                error_count = 0;
                info!(session_present = ack.session_present, "MQTT connected");
                if connected_once && !ack.session_present {
                    resubscribe(&client, &subscriptions);
                }
                connected_once = true;
            }
            Ok(_) => {}
            Err(e) => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                error_count += 1;
                let err = mqtt_err!(e.to_string());
                observer.on_error(&err);
                if error_count >= max_errors {
                    error!(
                        error = %e,
                        errors = error_count,
                        "MQTT error count reached limit, stopping"
                    );
                    break;
                }
                warn!(error = %e, errors = error_count, max_errors, "MQTT connection error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    running.store(false, Ordering::Release);
    info!("MQTT event loop stopped");
}

fn resubscribe(client: &AsyncClient, subscriptions: &Mutex<HashMap<String, Qos>>) {
    let subscriptions: Vec<(String, Qos)> = subscriptions
        .lock()
        .iter()
        .map(|(topic, qos)| (topic.clone(), *qos))
        .collect();
    for (topic, qos) in subscriptions {
        if let Err(e) = client.try_subscribe(topic.as_str(), qos.into()) {
            warn!(topic = %topic, error = %e, "Failed to restore subscription");
        }
    }
}
