//! Service context handed to driver code by [`crate::run`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{info, info_span, Span};

use crate::config::{self, env_vars, RunMode};
use crate::error::{Error, Result};

struct ContextInner {
    service_name: String,
    run_mode: RunMode,
    host_path_lib: PathBuf,
    config_file: PathBuf,
    shutdown: watch::Sender<bool>,
}

/// Generic capabilities every driver gets from the host: config file
/// access, a logging span and a wait-for-termination primitive.
///
/// Cloning is cheap; all clones share the same shutdown state.
#[derive(Clone)]
pub struct ServiceContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("service_name", &self.inner.service_name)
            .field("run_mode", &self.inner.run_mode)
            .field("config_file", &self.inner.config_file)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl ServiceContext {
    pub fn new(
        service_name: impl Into<String>,
        run_mode: RunMode,
        host_path_lib: impl Into<PathBuf>,
        config_file: impl Into<PathBuf>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                service_name: service_name.into(),
                run_mode,
                host_path_lib: host_path_lib.into(),
                config_file: config_file.into(),
                shutdown,
            }),
        }
    }

    /// Build a context from the `BAETYL_*` environment variables.
    pub fn from_env() -> Self {
        let service_name = std::env::var(env_vars::SERVICE_NAME)
            .unwrap_or_else(|_| "baetyl-driver".to_string());
        Self::new(
            service_name,
            RunMode::from_env(),
            config::host_path_lib(),
            config::config_file(),
        )
    }

    /// Same context with another config file.
    pub fn with_config_file(self, path: impl Into<PathBuf>) -> Self {
        Self::new(
            self.inner.service_name.clone(),
            self.inner.run_mode,
            self.inner.host_path_lib.clone(),
            path,
        )
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn run_mode(&self) -> RunMode {
        self.inner.run_mode
    }

    pub fn host_path_lib(&self) -> &Path {
        &self.inner.host_path_lib
    }

    pub fn config_file(&self) -> &Path {
        &self.inner.config_file
    }

    /// Span carrying the service identity; enter it to tag log lines.
    pub fn log(&self) -> Span {
        info_span!(
            "service",
            name = %self.inner.service_name,
            mode = %self.inner.run_mode
        )
    }

    /// Parse the service config file into `T`.
    pub fn load_config<T: DeserializeOwned>(&self) -> Result<T> {
        config::load_yaml_file(&self.inner.config_file)
    }

    /// Like [`Self::load_config`], but a missing file yields `T::default()`.
    pub fn load_config_or_default<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match self.load_config() {
            Err(Error::ConfigNotFound(path)) => {
                info!(path = %path, "Service config not found, using defaults");
                Ok(T::default())
            }
            other => other,
        }
    }

    /// Ask every waiter to stop.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Resolves once [`Self::shutdown`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.shutdown.subscribe();
        // The sender lives in `inner`, so `wait_for` only fails if it was dropped.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Block until SIGINT/SIGTERM arrives or shutdown is requested, then
    /// mark the context as shut down.
    pub async fn wait(&self) {
        tokio::select! {
            result = termination_signal() => match result {
                Ok(()) => info!("Termination signal received"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for termination signals");
                    self.cancelled().await;
                }
            },
            _ = self.cancelled() => {}
        }
        self.shutdown();
    }
}

#[cfg(unix)]
async fn termination_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Conf {
        #[serde(default)]
        name: String,
    }

    fn context(config_file: PathBuf) -> ServiceContext {
        ServiceContext::new("test", RunMode::Native, "/tmp/lib", config_file)
    }

    #[tokio::test]
    async fn test_wait_returns_on_shutdown() {
        let ctx = context(PathBuf::from("conf.yml"));
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        ctx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait should return after shutdown")
            .unwrap();
        assert!(ctx.is_shutdown());
    }

    #[tokio::test]
    async fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yml");
        std::fs::write(&path, "name: modbus\n").unwrap();

        let ctx = context(path);
        let conf: Conf = ctx.load_config().unwrap();
        assert_eq!(conf.name, "modbus");
    }

    #[tokio::test]
    async fn test_load_config_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path().join("missing.yml"));

        assert!(matches!(ctx.load_config::<Conf>(), Err(Error::ConfigNotFound(_))));
        assert_eq!(ctx.load_config_or_default::<Conf>().unwrap(), Conf::default());
    }
}
