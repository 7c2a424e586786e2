//! Tracing setup: console output plus RFC 5424 syslog over UDP

use crate::settings::LogSettings;
use anyhow::{anyhow, Context as _};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use syslog::{Facility, Formatter5424, Logger, LoggerBackend};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `log`, tagging syslog records with `component`
pub fn init_tracing(log: &LogSettings, component: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let (plain, json) = if log.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(false)))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_target(false)), None)
    };

    let syslog = if log.syslog {
        Some(SyslogLayer::connect(&log.syslog_host, log.syslog_port, component)?)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(syslog)
        .try_init()
        .context("installing tracing subscriber")
}

/// Forwards every event to a syslog server as an RFC 5424 datagram
pub struct SyslogLayer {
    component: String,
    logger: Mutex<Logger<LoggerBackend, Formatter5424>>,
}

impl SyslogLayer {
    pub fn connect(host: &str, port: u16, component: &str) -> anyhow::Result<Self> {
        let formatter = Formatter5424 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: component.to_string(),
            pid: std::process::id(),
        };
        let server = format!("{}:{}", host, port);
        let logger = syslog::udp(formatter, "0.0.0.0:0", server.as_str())
            .map_err(|e| anyhow!("connecting to syslog at {}: {}", server, e))?;

        Ok(Self {
            component: component.to_string(),
            logger: Mutex::new(logger),
        })
    }
}

impl<S: Subscriber> Layer<S> for SyslogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let level = *event.metadata().level();
        let line = format!("{} | {} | {}", self.component, level, visitor.0);
        let record = (0u32, BTreeMap::<String, BTreeMap<String, String>>::new(), line);

        // Delivery is best effort
        let mut logger = self.logger.lock();
        let _ = match level {
            Level::ERROR => logger.err(record),
            Level::WARN => logger.warning(record),
            Level::INFO => logger.info(record),
            _ => logger.debug(record),
        };
    }
}

/// Renders the `message` field followed by any other fields as `key=value`
#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0.insert_str(0, value);
        } else {
            let _ = write!(self.0, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0.insert_str(0, &format!("{:?}", value));
        } else {
            let _ = write!(self.0, " {}={:?}", field.name(), value);
        }
    }
}
