//! # Logging
//!
//! Installs the `tracing` subscriber and keeps a handle so the cloud
//! `logLevel` setting can change verbosity while the player runs.
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Takes precedence at startup
//! - `logLevel` shadow key - Replaces the filter at runtime
//! - Default: INFO level

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

use signage_core::LogLevel;

use crate::error::{SyncError, SyncResult};

/// Dependencies that are noisy at debug level.
const QUIET_TARGETS: [&str; 2] = ["hyper", "rustls"];

/// Quiet targets never log more than `warn`, nor more than `level`.
fn filter_for(level: LogLevel) -> EnvFilter {
    let quiet = match level {
        LogLevel::Error => "error",
        _ => "warn",
    };
    let mut directives = level.as_directive().to_string();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{}={}", target, quiet));
    }
    EnvFilter::new(directives)
}

/// Runtime control over the active log filter.
#[derive(Clone)]
pub struct LogLevelHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    /// Builds a reloadable filter layer and its handle.
    pub fn reloadable(initial: EnvFilter) -> (reload::Layer<EnvFilter, Registry>, Self) {
        let (layer, inner) = reload::Layer::new(initial);
        (layer, LogLevelHandle { inner })
    }

    /// Replaces the filter with one for `level`.
    pub fn set_level(&self, level: LogLevel) -> SyncResult<()> {
        self.inner
            .reload(filter_for(level))
            .map_err(|e| SyncError::InvalidConfig(format!("log filter reload failed: {}", e)))
    }

    /// Most verbose level the current filter lets through.
    pub fn max_level(&self) -> SyncResult<Option<LevelFilter>> {
        self.inner
            .with_current(|filter| <EnvFilter as Layer<Registry>>::max_level_hint(filter))
            .map_err(|e| SyncError::InvalidConfig(format!("log filter unavailable: {}", e)))
    }
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` until the first runtime change.
pub fn init_tracing(level: LogLevel) -> SyncResult<LogLevelHandle> {
    let initial = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level));
    let (filter, handle) = LogLevelHandle::reloadable(initial);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| SyncError::InvalidConfig(format!("tracing already initialized: {}", e)))?;

    Ok(handle)
}
