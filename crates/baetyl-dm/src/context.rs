//! Device-management context: config tables, mailboxes and the device side
//! of the MQTT link.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use baetyl_core::mqtt::{MqttLink, Subscription};
use baetyl_core::ServiceContext;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, warn, Span};

use crate::blink::{
    gen_event_report_blink_data, gen_lifecycle_report_blink_data, gen_property_get_blink_data,
    gen_property_report_blink_data,
};
use crate::error::{DmError, DmResult};
use crate::loader::{self, DriverTables, LoadOptions};
use crate::mailbox::{Mailbox, MailboxRegistry, DEFAULT_MAILBOX_CAPACITY};
use crate::models::{AccessTemplate, DeviceInfo, DeviceProperty, MqttTopic};
use crate::observer::DeviceObserver;
use crate::settings::DriverSettings;
use crate::topic::TopicKind;
use crate::value::{parse_property_value, PropertyValue};

/// Inbound kinds each device subscribes to.
const INBOUND_KINDS: [TopicKind; 3] = [TopicKind::Delta, TopicKind::GetResponse, TopicKind::Event];

/// Immutable snapshot of every loaded driver.
#[derive(Debug, Default)]
struct ConfigRoot {
    drivers: HashMap<String, Arc<DriverTables>>,
    device_drivers: HashMap<String, String>,
}

/// Shared state of a driver process.
///
/// Config tables are replaced as a whole on load and read without
/// coordination afterwards. The context is meant to live in an `Arc`.
pub struct DmContext {
    service: ServiceContext,
    root: RwLock<Arc<ConfigRoot>>,
    mailboxes: Arc<MailboxRegistry>,
    link: RwLock<Option<Arc<dyn MqttLink>>>,
    options: LoadOptions,
}

impl DmContext {
    pub fn new(service: ServiceContext) -> Self {
        Self::with_settings(service, &DriverSettings::default())
    }

    pub fn with_settings(service: ServiceContext, settings: &DriverSettings) -> Self {
        let capacity = if settings.mailbox_capacity == 0 {
            DEFAULT_MAILBOX_CAPACITY
        } else {
            settings.mailbox_capacity
        };
        Self {
            service,
            root: RwLock::new(Arc::new(ConfigRoot::default())),
            mailboxes: Arc::new(MailboxRegistry::new(capacity)),
            link: RwLock::new(None),
            options: settings.load_options(),
        }
    }

    pub fn service(&self) -> &ServiceContext {
        &self.service
    }

    pub fn log(&self) -> Span {
        self.service.log()
    }

    /// Wait for a termination signal or a programmatic shutdown.
    pub async fn wait(&self) {
        self.service.wait().await
    }

    fn root(&self) -> Arc<ConfigRoot> {
        self.root.read().clone()
    }

    fn tables(&self, driver: &str) -> Option<Arc<DriverTables>> {
        self.root().drivers.get(driver).cloned()
    }

    /// Load the driver files in `dir` and publish them under `driver`.
    ///
    /// On error the previously loaded tables stay in place.
    pub fn load_driver_config(&self, dir: impl AsRef<Path>, driver: &str) -> DmResult<()> {
        let tables = loader::load_driver_config(dir.as_ref(), driver, self.options)?;

        let mut guard = self.root.write();
        let mut drivers = guard.drivers.clone();
        let mut device_drivers: HashMap<String, String> = guard
            .device_drivers
            .iter()
            .filter(|(_, d)| d.as_str() != driver)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for name in tables.device_names() {
            if let Some(previous) = device_drivers.insert(name.to_string(), driver.to_string()) {
                warn!(
                    device = %name,
                    previous = %previous,
                    driver = %driver,
                    "Device moves to another driver"
                );
            }
        }
        drivers.insert(driver.to_string(), Arc::new(tables));

        *guard = Arc::new(ConfigRoot {
            drivers,
            device_drivers,
        });
        Ok(())
    }

    pub fn get_device(&self, driver: &str, name: &str) -> DmResult<DeviceInfo> {
        self.tables(driver)
            .and_then(|t| t.device(name).cloned())
            .ok_or_else(|| DmError::DeviceNotExist(name.to_string()))
    }

    /// Driver owning `device`, or an empty string.
    pub fn get_driver_name_by_device(&self, device: &str) -> String {
        self.root()
            .device_drivers
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_all_devices(&self, driver: &str) -> Vec<DeviceInfo> {
        self.tables(driver)
            .map(|t| t.devices.clone())
            .unwrap_or_default()
    }

    /// Properties of the model bound to `device`.
    pub fn get_device_model(&self, driver: &str, device: &str) -> DmResult<Vec<DeviceProperty>> {
        let info = self.get_device(driver, device)?;
        self.tables(driver)
            .and_then(|t| t.models.get(&info.device_model).cloned())
            .ok_or(DmError::DeviceModelNotExist(info.device_model))
    }

    /// Access template bound to `device`.
    pub fn get_access_templates(&self, driver: &str, device: &str) -> DmResult<AccessTemplate> {
        let info = self.get_device(driver, device)?;
        self.tables(driver)
            .and_then(|t| t.templates.get(&info.access_template).cloned())
            .ok_or(DmError::AccessTemplateNotExist(info.access_template))
    }

    pub fn get_all_device_models(&self, driver: &str) -> HashMap<String, Vec<DeviceProperty>> {
        self.tables(driver)
            .map(|t| t.models.clone())
            .unwrap_or_default()
    }

    pub fn get_all_access_templates(&self, driver: &str) -> HashMap<String, AccessTemplate> {
        self.tables(driver)
            .map(|t| t.templates.clone())
            .unwrap_or_default()
    }

    /// Names of the loaded drivers, sorted.
    pub fn get_driver_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.root().drivers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Normalize raw values keyed by model property name.
    pub fn parse_property_values(
        &self,
        driver: &str,
        device: &str,
        props: &Map<String, Value>,
    ) -> DmResult<BTreeMap<String, PropertyValue>> {
        let model = self.get_device_model(driver, device)?;
        let mut out = BTreeMap::new();
        for (name, value) in props {
            let property = model
                .iter()
                .find(|p| &p.name == name)
                .ok_or_else(|| DmError::PropsConfigNotExist(name.clone()))?;
            out.insert(name.clone(), parse_property_value(property, value)?);
        }
        Ok(out)
    }

    /// Observer to install on the MQTT client.
    pub fn observer(&self) -> Arc<DeviceObserver> {
        Arc::new(DeviceObserver::new(self.mailboxes.clone()))
    }

    pub fn attach_link(&self, link: Arc<dyn MqttLink>) {
        *self.link.write() = Some(link);
    }

    fn link(&self) -> DmResult<Arc<dyn MqttLink>> {
        self.link
            .read()
            .clone()
            .ok_or_else(|| DmError::Mqtt(baetyl_core::Error::Mqtt("no MQTT link attached".into())))
    }

    /// Open the mailboxes of every device of `driver` and subscribe their
    /// inbound topics. Devices that already have a mailbox are skipped.
    pub async fn subscribe(&self, driver: &str) -> DmResult<Vec<Mailbox>> {
        let link = self.link()?;
        let devices = self.get_all_devices(driver);

        let mut mailboxes = Vec::new();
        let mut subscriptions = Vec::new();
        for device in &devices {
            let Some(mailbox) = self.mailboxes.open(&device.name) else {
                debug!(device = %device.name, "Mailbox already open");
                continue;
            };
            let topics = device.device_topic();
            for kind in INBOUND_KINDS {
                let topic = topics.topic(kind);
                self.mailboxes.route(&topic.topic, &device.name, kind);
                subscriptions.push(Subscription::new(topic.topic.clone(), topic.qos));
            }
            mailboxes.push(mailbox);
        }

        if !subscriptions.is_empty() {
            link.subscribe(&subscriptions).await?;
        }
        info!(driver = %driver, devices = mailboxes.len(), "Subscribed device topics");
        Ok(mailboxes)
    }

    async fn publish(&self, topic: &MqttTopic, payload: Vec<u8>) -> DmResult<()> {
        self.link()?.publish(&topic.topic, topic.qos, payload).await?;
        Ok(())
    }

    fn device_topic(&self, driver: &str, device: &str, kind: TopicKind) -> DmResult<MqttTopic> {
        Ok(self.get_device(driver, device)?.device_topic().topic(kind).clone())
    }

    /// Report property values on the device's `report` topic.
    pub async fn report_device_properties(
        &self,
        driver: &str,
        device: &str,
        props: Map<String, Value>,
    ) -> DmResult<()> {
        let topic = self.device_topic(driver, device, TopicKind::Report)?;
        let blink = gen_property_report_blink_data(props);
        self.publish(&topic, blink.to_vec()?).await
    }

    /// Report events on the device's `eventReport` topic.
    pub async fn report_device_events(
        &self,
        driver: &str,
        device: &str,
        events: Map<String, Value>,
    ) -> DmResult<()> {
        let topic = self.device_topic(driver, device, TopicKind::EventReport)?;
        let blink = gen_event_report_blink_data(events);
        self.publish(&topic, blink.to_vec()?).await
    }

    /// Ask for property values; returns the request id.
    pub async fn get_device_properties(
        &self,
        driver: &str,
        device: &str,
        keys: &[String],
    ) -> DmResult<String> {
        let topic = self.device_topic(driver, device, TopicKind::PropertyGet)?;
        let blink = gen_property_get_blink_data(keys);
        self.publish(&topic, blink.to_vec()?).await?;
        Ok(blink.blink.req_id)
    }

    /// Request the device shadow; the answer arrives in the mailbox.
    pub async fn get_device_shadow(&self, driver: &str, device: &str) -> DmResult<()> {
        let topic = self.device_topic(driver, device, TopicKind::Get)?;
        self.publish(&topic, b"{}".to_vec()).await
    }

    pub async fn online(&self, driver: &str, device: &str) -> DmResult<()> {
        self.report_lifecycle(driver, device, true).await
    }

    pub async fn offline(&self, driver: &str, device: &str) -> DmResult<()> {
        self.report_lifecycle(driver, device, false).await
    }

    async fn report_lifecycle(&self, driver: &str, device: &str, online: bool) -> DmResult<()> {
        let topic = self.device_topic(driver, device, TopicKind::LifecycleReport)?;
        let blink = gen_lifecycle_report_blink_data(online);
        self.publish(&topic, blink.to_vec()?).await?;
        debug!(device = %device, online, "Reported lifecycle");
        Ok(())
    }

    /// Close every mailbox; readers drain and then observe end of stream.
    pub fn close(&self) {
        self.mailboxes.close();
        info!("Device mailboxes closed");
    }
}
