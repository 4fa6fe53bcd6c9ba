//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Shared configuration and logging for the gateway bridge."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "EAGLE_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// File and stdout writer guards of the installed subscriber.
static WRITER_GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Shape of the log lines the bridge writes to stdout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the global subscriber: stdout in `config.format` plus a daily JSON
/// file `<prefix>.log.<date>` under `config.directory`.
///
/// The filter comes from `EAGLE_LOG`, then `RUST_LOG`, then `info`. Calling this
/// again keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("cannot create log directory {}", config.directory.display())
    })?;
    let file_name = format!(
        "{}.log",
        config.file_prefix.as_deref().unwrap_or(service_name)
    );

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, &file_name));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let layers: Vec<BoxedLayer> = vec![
        console_layer(config.format, stdout_writer),
        fmt::layer()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(file_writer)
            .boxed(),
    ];

    let installed = tracing_subscriber::registry()
        .with(log_filter())
        .with(layers)
        .try_init()
        .is_ok();
    if !installed {
        debug!("tracing subscriber already installed");
        return Ok(());
    }
    let _ = WRITER_GUARDS.set([file_guard, stdout_guard]);

    info!(
        service = service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "logging ready"
    );
    Ok(())
}

fn log_filter() -> EnvFilter {
    if let Ok(directive) = std::env::var(LOG_ENV) {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("ignoring invalid {LOG_ENV}={directive:?}: {err}"),
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn console_layer(format: LogFormat, writer: NonBlocking) -> BoxedLayer {
    let layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.with_target(false).json().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}
