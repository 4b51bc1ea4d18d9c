//! Process entry point for drivers.

use std::any::Any;
use std::future::Future;
use std::process::ExitCode;

use serde::Deserialize;
use tracing::{error, info, Instrument};

use crate::config::LoggerConfig;
use crate::context::ServiceContext;
use crate::logging;

/// Exit code of a handler that returned an error.
pub const EXIT_HANDLER_ERROR: u8 = 1;
/// Exit code of a handler that panicked.
pub const EXIT_PANIC: u8 = 2;

/// The part of a service config file the host itself reads.
#[derive(Debug, Default, Deserialize)]
struct HostConfig {
    #[serde(default)]
    logger: LoggerConfig,
}

/// Run `handler` with a context built from the environment.
///
/// Builds a multi-threaded tokio runtime, installs the logger from the
/// config file's `logger` section, and converts the handler outcome into an
/// exit code. Panics inside the handler are trapped here and logged.
pub fn run<F, Fut>(handler: F) -> ExitCode
where
    F: FnOnce(ServiceContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    run_with_context(ServiceContext::from_env(), handler)
}

/// Like [`run`], with an explicit context.
pub fn run_with_context<F, Fut>(ctx: ServiceContext, handler: F) -> ExitCode
where
    F: FnOnce(ServiceContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::from(EXIT_HANDLER_ERROR);
        }
    };

    let code = runtime.block_on(serve(ctx, handler));
    ExitCode::from(code)
}

/// Drive `handler` on the current runtime and return the numeric exit code.
pub async fn serve<F, Fut>(ctx: ServiceContext, handler: F) -> u8
where
    F: FnOnce(ServiceContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let logger = match ctx.load_config_or_default::<HostConfig>() {
        Ok(host) => host.logger,
        Err(e) => {
            eprintln!("failed to read logger config: {e}");
            LoggerConfig::default()
        }
    };
    logging::init(&logger);

    let span = ctx.log();
    info!(parent: &span, config = %ctx.config_file().display(), "Service starting");

    let task = tokio::spawn(handler(ctx.clone()).instrument(span.clone()));
    let code = match task.await {
        Ok(Ok(())) => {
            info!(parent: &span, "Service stopped");
            0
        }
        Ok(Err(e)) => {
            error!(parent: &span, error = %format!("{e:#}"), "Service exited with error");
            EXIT_HANDLER_ERROR
        }
        Err(join) if join.is_panic() => {
            let reason = panic_message(join.into_panic());
            error!(parent: &span, reason = %reason, "Service panicked");
            EXIT_PANIC
        }
        Err(join) => {
            error!(parent: &span, error = %join, "Service task was cancelled");
            EXIT_HANDLER_ERROR
        }
    };

    ctx.shutdown();
    code
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
