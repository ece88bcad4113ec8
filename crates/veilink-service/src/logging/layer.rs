// ============================================
// File: crates/veilink-service/src/logging/layer.rs
// ============================================
//! # Tracing Sink Layer
//!
//! ## Creation Reason
//! Bridges the process's `tracing` events into the registered
//! [`LogSink`], so every record emitted anywhere while the command
//! server is active lands in its history and broadcast.
//!
//! ## Main Functionality
//! - `SinkLayer`: `tracing_subscriber::Layer` forwarding formatted
//!   events to a [`SinkRegistry`]
//! - `init_tracing`: subscriber setup used by hosts and the CLI
//!
//! ## ⚠️ Important Note for Next Developer
//! - The layer formats events as `message key=value ...`; keep it
//!   allocation-light, it runs on every log call in the process

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use veilink_common::types::{LogRecord, Severity};

use crate::logging::SinkRegistry;

// ============================================
// SinkLayer
// ============================================

/// Tracing layer forwarding every event into the sink registry.
pub struct SinkLayer {
    registry: Arc<SinkRegistry>,
}

impl SinkLayer {
    /// Creates a layer writing into `registry`.
    #[must_use]
    pub fn new(registry: Arc<SinkRegistry>) -> Self {
        Self { registry }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let severity = match *event.metadata().level() {
            Level::ERROR => Severity::Error,
            Level::WARN => Severity::Warning,
            Level::INFO => Severity::Info,
            Level::DEBUG | Level::TRACE => Severity::Debug,
        };

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        self.registry
            .write(&LogRecord::new(severity, visitor.into_message()));
    }
}

/// Collects the `message` field plus structured fields of one event.
#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: String,
}

impl EventVisitor {
    fn into_message(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_owned()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }
}

// ============================================
// Subscriber Setup
// ============================================

/// Initializes the process tracing subscriber: env-filtered fmt output
/// plus the sink layer.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(level: &str, registry: Arc<SinkRegistry>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(SinkLayer::new(registry))
        .try_init()
        .ok();
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogBroker;

    #[test]
    fn test_events_reach_installed_sink() {
        let registry = Arc::new(SinkRegistry::new());
        let broker = Arc::new(LogBroker::new(16));
        registry.install(Arc::clone(&broker) as Arc<dyn crate::logging::LogSink>);

        let subscriber =
            tracing_subscriber::registry().with(SinkLayer::new(Arc::clone(&registry)));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("bridge started");
            tracing::error!(destination = "tcp:1.2.3.4:443", "dispatch failed");
        });

        let snapshot = broker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].severity, Severity::Info);
        assert_eq!(snapshot[0].message, "bridge started");
        assert_eq!(snapshot[1].severity, Severity::Error);
        assert!(snapshot[1].message.contains("dispatch failed"));
        assert!(snapshot[1].message.contains("destination=tcp:1.2.3.4:443"));
    }

    #[test]
    fn test_events_after_restore_are_dropped() {
        let registry = Arc::new(SinkRegistry::new());
        let broker = Arc::new(LogBroker::new(16));
        registry.install(Arc::clone(&broker) as Arc<dyn crate::logging::LogSink>);
        registry.restore_noop();

        let subscriber =
            tracing_subscriber::registry().with(SinkLayer::new(Arc::clone(&registry)));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("not recorded");
        });

        assert!(broker.is_empty());
    }
}
