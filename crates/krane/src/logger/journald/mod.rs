//! Log driver forwarding container output to the systemd journal.
//!
//! Container output is written at the regular stdout/stderr priorities,
//! while daemon-synthesized events carry a `CONTAINER_EVENT=true` field and
//! go out at warning priority. The journal rate-limits priorities
//! separately, so a flooding container cannot push a stop event over the
//! host limit even if the per-container limiter was ineffective.

mod journal;
mod rate_limit;

pub use journal::{JOURNAL_SOCKET, Journal, Priority};
pub use rate_limit::RateLimit;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use krane_common::{KraneError, KraneResult};

use self::journal::JournalWriter;
use super::{LogContext, LogDriver, Message, Source};

/// The driver's registered name.
pub const DRIVER_NAME: &str = "journald";

/// Container label selecting the rate-limit burst (messages per interval).
pub const BURST_LABEL: &str = "io.krane.log-burst";

/// Container label selecting the rate-limit interval (duration string).
pub const INTERVAL_LABEL: &str = "io.krane.log-interval";

/// Journald log driver.
pub struct JournaldDriver {
    journal: Box<dyn JournalWriter>,
    /// Fields sent with every regular message.
    vars: HashMap<String, String>,
    /// `vars` plus the marker identifying an event-class write.
    event_vars: HashMap<String, String>,
    /// Per-container limiter; absent when the rate-limit labels are not set.
    rate_limit: Option<Mutex<RateLimit>>,
}

impl JournaldDriver {
    /// Create a driver for the container described by `ctx`.
    ///
    /// # Errors
    ///
    /// Fails when the host journal is unavailable.
    pub fn factory(ctx: &LogContext) -> KraneResult<Arc<dyn LogDriver>> {
        if !Journal::available() {
            return Err(KraneError::Config {
                message: "journald is not available on this host".to_string(),
            });
        }
        let journal = Journal::connect()?;
        Ok(Arc::new(Self::with_journal(Box::new(journal), ctx)))
    }

    fn with_journal(journal: Box<dyn JournalWriter>, ctx: &LogContext) -> Self {
        // Strip the leading slash so hosts can search for
        // CONTAINER_NAME=foo rather than CONTAINER_NAME=/foo.
        let name = ctx.name().to_string();
        let tag = ctx.tag(ctx.container_id.short());

        let mut vars = HashMap::from([
            (
                "CONTAINER_ID".to_string(),
                ctx.container_id.short().to_string(),
            ),
            (
                "CONTAINER_ID_FULL".to_string(),
                ctx.container_id.to_string(),
            ),
            ("CONTAINER_NAME".to_string(), name),
            ("CONTAINER_TAG".to_string(), tag),
        ]);
        for (key, value) in ctx.extra_attributes(str::to_uppercase) {
            vars.insert(key, value);
        }

        let mut event_vars = vars.clone();
        event_vars.insert("CONTAINER_EVENT".to_string(), "true".to_string());

        Self {
            journal,
            vars,
            event_vars,
            rate_limit: rate_limit_from_labels(&ctx.container_labels).map(Mutex::new),
        }
    }

    /// Validate driver options.
    ///
    /// # Errors
    ///
    /// Returns an error for any option key outside the fixed allow-list.
    pub fn validate_options(options: &HashMap<String, String>) -> KraneResult<()> {
        for key in options.keys() {
            match key.as_str() {
                "labels" | "env" | "tag" => {}
                _ => {
                    return Err(KraneError::Config {
                        message: format!("unknown log opt '{key}' for journald log driver"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Report how many lines the limiter dropped in the closed interval.
    fn send_suppressed(&self, suppressed: usize) -> KraneResult<()> {
        let line = serde_json::json!({"type": "dropped", "lines": suppressed}).to_string();
        self.journal
            .send(&line, Priority::Warning, &self.event_vars)
            .map_err(sink_error)?;
        Ok(())
    }
}

impl LogDriver for JournaldDriver {
    fn log(&self, msg: &Message) -> KraneResult<()> {
        let line = String::from_utf8_lossy(&msg.line);

        if msg.source == Source::Event {
            // Events bypass rate limiting: a dropped stop or start
            // notification is a correctness issue, not a volume issue.
            self.journal
                .send(&line, Priority::Warning, &self.event_vars)
                .map_err(sink_error)?;
            return Ok(());
        }

        // Output from the container itself; stdout and stderr share one
        // limiter.
        if let Some(limiter) = &self.rate_limit {
            let (allowed, suppressed) = limiter.lock().check();
            if !allowed {
                return Ok(());
            }
            if suppressed > 0 {
                if let Err(err) = self.send_suppressed(suppressed) {
                    tracing::error!(error = %err, "Failed to report suppressed log lines");
                }
            }
        }

        let priority = if msg.source == Source::Stderr {
            Priority::Err
        } else {
            Priority::Info
        };
        self.journal
            .send(&line, priority, &self.vars)
            .map_err(sink_error)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        DRIVER_NAME
    }
}

fn sink_error(err: std::io::Error) -> KraneError {
    KraneError::LogDriver {
        message: err.to_string(),
    }
}

/// Build a limiter from the container's labels.
///
/// Returns `None` when the labels are absent or cannot be parsed; a partial
/// or malformed configuration disables rate limiting rather than failing
/// driver construction.
fn rate_limit_from_labels(labels: &HashMap<String, String>) -> Option<RateLimit> {
    let burst_label = labels.get(BURST_LABEL);
    let interval_label = labels.get(INTERVAL_LABEL);

    let (burst_label, interval_label) = match (burst_label, interval_label) {
        (None, None) => return None,
        (Some(burst), Some(interval)) => (burst, interval),
        (burst, interval) => {
            tracing::error!(
                burst = burst.is_some(),
                interval = interval.is_some(),
                "Only one of the {BURST_LABEL}/{INTERVAL_LABEL} labels is set; not rate limiting",
            );
            return None;
        }
    };

    let burst = match burst_label.parse::<usize>() {
        Ok(burst) => burst,
        Err(err) => {
            tracing::error!(value = %burst_label, error = %err, "Couldn't parse {BURST_LABEL}");
            return None;
        }
    };

    let interval = match humantime::parse_duration(interval_label) {
        Ok(interval) => interval,
        Err(err) => {
            tracing::error!(value = %interval_label, error = %err, "Couldn't parse {INTERVAL_LABEL}");
            return None;
        }
    };

    Some(RateLimit::new(burst, interval))
}
