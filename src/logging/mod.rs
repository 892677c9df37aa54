//! Logging infrastructure for the client
//!
//! Components never reach for a process-wide logger. Each one receives a
//! [`Logger`] that filters entries by [`TraceLevel`] and hands them to a
//! [`LogWriter`]. The default writer forwards to `tracing`.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Bit mask of log categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceLevel(u8);

impl TraceLevel {
    pub const NONE: TraceLevel = TraceLevel(0);
    /// Message payloads sent and received
    pub const MESSAGES: TraceLevel = TraceLevel(0x01);
    pub const EVENTS: TraceLevel = TraceLevel(0x02);
    /// `old -> new` state transitions
    pub const STATE_CHANGES: TraceLevel = TraceLevel(0x04);
    pub const ERRORS: TraceLevel = TraceLevel(0x08);
    pub const INFO: TraceLevel = TraceLevel(0x10);
    pub const ALL: TraceLevel = TraceLevel(0x1f);

    pub fn contains(self, other: TraceLevel) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Parse a comma-separated list such as `errors,state_changes`.
    pub fn parse_list(list: &str) -> Result<Self, String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .try_fold(TraceLevel::NONE, |acc, name| {
                let level = match name.to_ascii_lowercase().as_str() {
                    "none" => TraceLevel::NONE,
                    "messages" => TraceLevel::MESSAGES,
                    "events" => TraceLevel::EVENTS,
                    "state_changes" => TraceLevel::STATE_CHANGES,
                    "errors" => TraceLevel::ERRORS,
                    "info" => TraceLevel::INFO,
                    "all" => TraceLevel::ALL,
                    other => return Err(format!("unknown trace level '{}'", other)),
                };
                Ok(acc | level)
            })
    }
}

impl BitOr for TraceLevel {
    type Output = TraceLevel;

    fn bitor(self, rhs: TraceLevel) -> TraceLevel {
        TraceLevel(self.0 | rhs.0)
    }
}

impl Default for TraceLevel {
    fn default() -> Self {
        TraceLevel::ALL
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            TraceLevel::NONE => "none",
            TraceLevel::MESSAGES => "messages",
            TraceLevel::EVENTS => "events",
            TraceLevel::STATE_CHANGES => "state_changes",
            TraceLevel::ERRORS => "errors",
            TraceLevel::INFO => "info",
            TraceLevel::ALL => "all",
            _ => return write!(f, "{:#04x}", self.0),
        };
        f.write_str(name)
    }
}

/// Sink for log entries that passed the level filter.
pub trait LogWriter: Send + Sync {
    fn write(&self, level: TraceLevel, entry: &str);
}

/// Forwards entries to `tracing` under the `signalr_client` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogWriter;

impl LogWriter for TracingLogWriter {
    fn write(&self, level: TraceLevel, entry: &str) {
        match level {
            TraceLevel::ERRORS => tracing::error!(target: "signalr_client", "{}", entry),
            TraceLevel::STATE_CHANGES | TraceLevel::INFO => {
                tracing::info!(target: "signalr_client", category = %level, "{}", entry)
            }
            TraceLevel::MESSAGES => tracing::trace!(target: "signalr_client", "{}", entry),
            _ => tracing::debug!(target: "signalr_client", category = %level, "{}", entry),
        }
    }
}

/// Filtering logger handed to every component of a connection.
#[derive(Clone)]
pub struct Logger {
    writer: Arc<dyn LogWriter>,
    level: TraceLevel,
}

impl Logger {
    pub fn new(writer: Arc<dyn LogWriter>, level: TraceLevel) -> Self {
        Self { writer, level }
    }

    /// Logger writing to `tracing` with the given mask.
    pub fn tracing(level: TraceLevel) -> Self {
        Self::new(Arc::new(TracingLogWriter), level)
    }

    pub fn is_enabled(&self, level: TraceLevel) -> bool {
        self.level.contains(level)
    }

    pub fn log(&self, level: TraceLevel, entry: impl AsRef<str>) {
        if self.is_enabled(level) {
            self.writer.write(level, entry.as_ref());
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing(TraceLevel::ALL)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish()
    }
}

/// Initialise the global `tracing` subscriber for binaries.
///
/// `RUST_LOG` wins over `log_level` when set.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("signalr_client={},info", log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
