//! Service host for Baetyl edge drivers.
//!
//! This crate owns everything a driver process needs before device logic
//! starts: config file access, logger wiring, signal-driven lifetime and the
//! MQTT client boundary.
//!
//! ```rust,no_run
//! use baetyl_core::ServiceContext;
//!
//! fn main() -> std::process::ExitCode {
//!     baetyl_core::run(|ctx: ServiceContext| async move {
//!         ctx.wait().await;
//!         Ok(())
//!     })
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod mqtt;
pub mod service;

pub use config::{LogFormat, LoggerConfig, RunMode};
pub use context::ServiceContext;
pub use error::{Error, Result};
pub use mqtt::{MqttClient, MqttClientConfig, MqttLink, Observer, Qos, Subscription};
pub use service::{run, run_with_context, serve};
