// ============================================
// File: crates/veilink-service/src/service.rs
// ============================================
//! # Service Lifecycle
//!
//! ## Creation Reason
//! The host-owned lifecycle object tying the pieces together: the
//! proxying engine and the tun bridge, under a single service-scoped
//! cancellation channel.
//!
//! ## Lifecycle
//! ```text
//! host starts the command server first (early startup logs are
//! captured), builds the engine from configuration, then:
//!
//!   Service::start  = engine.start → bridge.start
//!   Service::close  = cancel → bridge.close → engine.close
//!                     │
//!                     └── hard timeout (default 10 s): if ordinary
//!                         shutdown has not completed, the process
//!                         terminates unconditionally
//! ```
//! The hard timeout is a deliberate fail-safe against a
//! non-terminating shutdown path hanging the host application, not a
//! recoverable error.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `close_with_timeout` exists so the timeout boundary is testable;
//!   only `close` escalates to process termination
//! - Recovery is the host's responsibility (recreate the service);
//!   nothing here retries

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info};

use veilink_core::engine::ProxyEngine;
use veilink_core::protocol::ServiceStatus;
use veilink_platform::stack::StackProvider;
use veilink_platform::traits::Platform;

use veilink_common::time::AtomicInstant;

use crate::bridge::TunBridge;
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};

// ============================================
// ShutdownOutcome
// ============================================

/// How a bounded shutdown attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Ordinary shutdown completed inside the deadline.
    Completed,
    /// The deadline elapsed first.
    TimedOut,
}

// ============================================
// Service
// ============================================

/// The running instance: engine plus tun bridge.
pub struct Service {
    engine: Arc<dyn ProxyEngine>,
    bridge: Arc<TunBridge>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    started_at: AtomicInstant,
    shutdown_timeout: Duration,
}

impl Service {
    /// Builds a stopped service from configuration and collaborators.
    ///
    /// # Errors
    /// Returns configuration validation errors.
    pub fn new(
        config: &ServiceConfig,
        engine: Arc<dyn ProxyEngine>,
        platform: Arc<dyn Platform>,
        stack_provider: Arc<dyn StackProvider>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let (shutdown, _) = broadcast::channel(1);
        let bridge = TunBridge::new(
            platform,
            Arc::clone(&engine),
            stack_provider,
            &config.tunnel,
            shutdown.clone(),
        );
        Ok(Arc::new(Self {
            engine,
            bridge,
            shutdown,
            running: AtomicBool::new(false),
            started_at: AtomicInstant::now(),
            shutdown_timeout: config.shutdown.timeout(),
        }))
    }

    /// Starts the engine, then the bridge.
    ///
    /// # Errors
    /// A bridge failure closes the already-started engine before
    /// surfacing.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::AlreadyRunning);
        }
        if let Err(e) = self.engine.start().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        if let Err(e) = self.bridge.start().await {
            let _ = self.engine.close().await;
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.started_at.touch();
        info!("service started");
        Ok(())
    }

    /// Shuts down with the configured hard timeout; terminates the
    /// process unconditionally if the timeout elapses.
    pub async fn close(&self) {
        match self.close_with_timeout(self.shutdown_timeout).await {
            ShutdownOutcome::Completed => {}
            ShutdownOutcome::TimedOut => {
                error!(
                    "shutdown did not complete within {:?}, terminating",
                    self.shutdown_timeout
                );
                std::process::exit(1);
            }
        }
    }

    /// Shuts down with an explicit deadline, reporting the outcome
    /// instead of terminating.
    pub async fn close_with_timeout(&self, timeout: Duration) -> ShutdownOutcome {
        self.running.store(false, Ordering::SeqCst);
        // Cancel every derived flow context first.
        let _ = self.shutdown.send(());

        let work = async {
            self.bridge.close().await;
            if let Err(e) = self.engine.close().await {
                error!("engine close: {}", e);
            }
        };
        match tokio::time::timeout(timeout, work).await {
            Ok(()) => {
                info!("service closed");
                ShutdownOutcome::Completed
            }
            Err(_) => ShutdownOutcome::TimedOut,
        }
    }

    /// Forces termination of all active flows via the engine.
    pub async fn reset_connections(&self) -> usize {
        self.engine.reset_connections().await
    }

    /// Returns `true` while the service is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        let running = self.is_running();
        let traffic = self.bridge.traffic();
        ServiceStatus {
            running,
            active_flows: self.bridge.flow_count() as u32,
            uplink_bytes: traffic.uplink_bytes(),
            downlink_bytes: traffic.downlink_bytes(),
            uptime_secs: if running {
                self.started_at.elapsed().as_secs()
            } else {
                0
            },
        }
    }

    /// The data-plane bridge.
    #[must_use]
    pub fn bridge(&self) -> &Arc<TunBridge> {
        &self.bridge
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("running", &self.is_running())
            .field("flows", &self.bridge.flow_count())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use veilink_core::engine::MemoryEngine;
    use veilink_platform::stack::MemoryStackProvider;
    use veilink_platform::tun::MockPlatform;

    struct Harness {
        platform: Arc<MockPlatform>,
        engine: Arc<MemoryEngine>,
        provider: Arc<MemoryStackProvider>,
        service: Arc<Service>,
    }

    fn harness() -> Harness {
        let platform = Arc::new(MockPlatform::new());
        let engine = Arc::new(MemoryEngine::new());
        let provider = Arc::new(MemoryStackProvider::new());
        let service = Service::new(
            &ServiceConfig::default(),
            Arc::clone(&engine) as Arc<dyn ProxyEngine>,
            Arc::clone(&platform) as Arc<dyn Platform>,
            Arc::clone(&provider) as Arc<dyn StackProvider>,
        )
        .unwrap();
        Harness {
            platform,
            engine,
            provider,
            service,
        }
    }

    #[tokio::test]
    async fn test_start_close_ordering() {
        let h = harness();
        h.service.start().await.unwrap();
        assert!(h.service.is_running());
        assert!(h.engine.is_started());
        assert!(h.service.bridge().is_running());

        let status = h.service.status();
        assert!(status.running);
        assert_eq!(status.active_flows, 0);

        let outcome = h
            .service
            .close_with_timeout(Duration::from_secs(5))
            .await;
        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert!(!h.service.is_running());
        assert!(h.engine.is_closed());
        assert_eq!(h.platform.open_descriptor_count(), 0);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let h = harness();
        h.service.start().await.unwrap();
        assert!(matches!(
            h.service.start().await,
            Err(ServiceError::AlreadyRunning)
        ));
        h.service.close_with_timeout(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_bridge_failure_closes_engine() {
        let h = harness();
        h.platform.set_fail_open_tun(true);

        assert!(h.service.start().await.is_err());
        assert!(!h.service.is_running());
        assert!(h.engine.is_closed());
        assert_eq!(h.platform.open_descriptor_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_close_hits_timeout_boundary() {
        let h = harness();
        h.service.start().await.unwrap();
        h.engine.set_hang_on_close(true);

        let deadline = Duration::from_secs(10);
        let started = Instant::now();
        let outcome = h.service.close_with_timeout(deadline).await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut);
        // Paused time auto-advances: the call resolves at the timeout
        // boundary instead of hanging indefinitely.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_status_reflects_traffic() {
        let h = harness();
        h.service.start().await.unwrap();
        h.service.bridge().traffic().record_uplink(100);
        h.service.bridge().traffic().record_downlink(42);

        let status = h.service.status();
        assert_eq!(status.uplink_bytes, 100);
        assert_eq!(status.downlink_bytes, 42);
        h.service.close_with_timeout(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_reset_connections_delegates_to_engine() {
        let h = harness();
        h.service.start().await.unwrap();
        assert_eq!(h.service.reset_connections().await, 0);

        let _ = h.provider.last_stack();
        h.service.close_with_timeout(Duration::from_secs(5)).await;
    }
}
