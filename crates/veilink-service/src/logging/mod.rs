// ============================================
// File: crates/veilink-service/src/logging/mod.rs
// ============================================
//! # Log Pipeline
//!
//! ## Creation Reason
//! The command server doubles as the process-wide log sink while it is
//! active. This module models that as explicit injection: a `LogSink`
//! capability registered at server start and restored to a no-op at
//! stop, instead of ambient global mutable state.
//!
//! ## Main Functionality
//! - [`LogSink`] / [`NoopSink`]: the swap-in capability
//! - [`SinkRegistry`]: holds the currently installed sink
//! - [`broker`]: bounded history plus broadcast distribution
//! - [`layer`]: tracing adapter feeding the registry
//!
//! ## Pipeline
//! ```text
//! tracing::info!(...)            command socket LOG stream
//!        │                                ▲
//!        ▼                                │
//!   SinkLayer ──► SinkRegistry ──► LogBroker (history + broadcast)
//!                     │
//!                     └─► NoopSink (after server stop)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Log calls after server stop must never block or fault; that is
//!   exactly what the no-op restore guarantees
//! - Sink implementations must not log through tracing themselves or
//!   they will re-enter the pipeline

use std::sync::Arc;

use parking_lot::RwLock;

use veilink_common::types::LogRecord;

pub mod broker;
pub mod layer;

pub use broker::{LogBroker, LogStream};
pub use layer::{init_tracing, SinkLayer};

// ============================================
// LogSink
// ============================================

/// Receives every record emitted in the process while installed.
pub trait LogSink: Send + Sync {
    /// Consumes one record. Must not block.
    fn write_record(&self, record: &LogRecord);
}

/// Sink that discards everything; installed whenever no command server
/// is active.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn write_record(&self, _record: &LogRecord) {}
}

// ============================================
// SinkRegistry
// ============================================

/// Holds the process-wide log sink.
///
/// Constructed by the host, shared with the tracing layer and the
/// command server; never a global.
pub struct SinkRegistry {
    sink: RwLock<Arc<dyn LogSink>>,
}

impl SinkRegistry {
    /// Creates a registry with the no-op sink installed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: RwLock::new(Arc::new(NoopSink)),
        }
    }

    /// Installs a sink, replacing the current one.
    pub fn install(&self, sink: Arc<dyn LogSink>) {
        *self.sink.write() = sink;
    }

    /// Restores the no-op sink.
    pub fn restore_noop(&self) {
        *self.sink.write() = Arc::new(NoopSink);
    }

    /// Writes a record through the installed sink.
    pub fn write(&self, record: &LogRecord) {
        self.sink.read().write_record(record);
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRegistry").finish_non_exhaustive()
    }
}

// ============================================
// PlatformSink
// ============================================

/// Sink forwarding records to the host's raw log write capability.
///
/// Useful for hosts that want diagnostics before (or without) an
/// active command server.
pub struct PlatformSink {
    platform: Arc<dyn veilink_platform::traits::Platform>,
}

impl PlatformSink {
    /// Creates a sink writing through `platform`.
    #[must_use]
    pub fn new(platform: Arc<dyn veilink_platform::traits::Platform>) -> Self {
        Self { platform }
    }
}

impl LogSink for PlatformSink {
    fn write_record(&self, record: &LogRecord) {
        self.platform.write_log(&record.to_string());
    }
}

impl std::fmt::Debug for PlatformSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSink").finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use veilink_common::types::Severity;

    struct CollectingSink {
        records: Mutex<Vec<LogRecord>>,
    }

    impl LogSink for CollectingSink {
        fn write_record(&self, record: &LogRecord) {
            self.records.lock().push(record.clone());
        }
    }

    #[test]
    fn test_platform_sink_forwards_lines() {
        use veilink_platform::traits::Platform;
        use veilink_platform::tun::MockPlatform;

        let platform = Arc::new(MockPlatform::new());
        let sink = PlatformSink::new(Arc::clone(&platform) as Arc<dyn Platform>);
        sink.write_record(&LogRecord::new(Severity::Warning, "listener closed"));
        assert_eq!(platform.log_lines(), vec!["[warning] listener closed"]);
    }

    #[test]
    fn test_install_and_restore() {
        let registry = SinkRegistry::new();
        let sink = Arc::new(CollectingSink {
            records: Mutex::new(Vec::new()),
        });

        // Nothing collected while the noop sink is installed.
        registry.write(&LogRecord::new(Severity::Info, "before"));
        assert!(sink.records.lock().is_empty());

        registry.install(Arc::clone(&sink) as Arc<dyn LogSink>);
        registry.write(&LogRecord::new(Severity::Info, "during"));
        assert_eq!(sink.records.lock().len(), 1);

        registry.restore_noop();
        registry.write(&LogRecord::new(Severity::Info, "after"));
        assert_eq!(sink.records.lock().len(), 1);
    }
}
