//! Device-management runtime for Baetyl drivers.
//!
//! A driver process loads its declarative configuration (sub-devices, thing
//! models, access templates), subscribes the device topics of the local
//! broker and exchanges blink envelopes with the cloud side through per-device
//! mailboxes.
//!
//! ## Layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`value`], [`expression`], [`mapping`] | value parsing and mapping expressions |
//! | [`loader`] | the three driver files |
//! | [`blink`] | the JSON envelope |
//! | [`topic`], [`observer`], [`mailbox`] | inbound routing |
//! | [`context`] | the public façade used by drivers |
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use baetyl_core::{MqttClient, MqttClientConfig, ServiceContext};
//! use baetyl_dm::DmContext;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = Arc::new(DmContext::new(ServiceContext::from_env()));
//! ctx.load_driver_config("etc/baetyl", "modbus")?;
//! let client = MqttClient::connect(&MqttClientConfig::default(), ctx.observer())?;
//! ctx.attach_link(Arc::new(client));
//! for mut mailbox in ctx.subscribe("modbus").await? {
//!     tokio::spawn(async move {
//!         while let Some(message) = mailbox.recv().await {
//!             println!("{} <- {}", message.device(), message.kind());
//!         }
//!     });
//! }
//! # Ok(())
//! # }
//! ```

pub mod access_config;
pub mod blink;
pub mod context;
pub mod error;
pub mod expression;
pub mod loader;
pub mod mailbox;
pub mod mapping;
pub mod message;
pub mod models;
pub mod observer;
pub mod settings;
pub mod topic;
pub mod value;

pub use access_config::{AccessConfig, DecodeMode};
pub use blink::{Blink, BlinkData};
pub use context::DmContext;
pub use error::{DmError, DmResult};
pub use expression::{exec_mapping, parse_expression, Expression, Method, Operand};
pub use loader::{load_driver_config, DriverTables, LoadOptions};
pub use mailbox::{Mailbox, Offer};
pub use mapping::{get_config_id_by_model_name, get_mapping_name, get_prop_value_by_model_name};
pub use message::{
    DeltaMessage, DeviceEvent, DeviceMessage, DeviceProperties, DeviceShadow, EventMessage,
    ResponseMessage,
};
pub use models::{
    AccessTemplate, ArrayType, DeviceInfo, DeviceProperty, DeviceTopic, EnumType, EnumValue,
    MappingType, ModelMapping, MqttTopic, ObjectType, PropertyMode, PropertyType,
};
pub use observer::DeviceObserver;
pub use settings::{DmConfig, DriverSettings};
pub use topic::TopicKind;
pub use value::{parse_property_value, parse_value, PropertyValue, ValueArgs};
