// ============================================
// File: crates/veilink-service/src/command/mod.rs
// ============================================
//! # Command Server and Client
//!
//! ## Creation Reason
//! The control plane of the service: a local socket the host
//! application uses to control the running instance and stream
//! diagnostic logs.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`server`]: listener, accept loop, per-connection handlers
//! - [`client`]: typed async client for every command
//!
//! ## Connection Model
//! ```text
//! client ──► [command u8] ──► handler owns the connection
//!
//! one command per connection; no further multiplexing
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Host hooks run on the connection's task; keep them prompt or the
//!   client blocks (other connections are unaffected)

pub mod client;
pub mod server;

pub use client::CommandClient;
pub use server::CommandServer;

use async_trait::async_trait;

use veilink_core::protocol::SystemProxyStatus;

// ============================================
// CommandHandler
// ============================================

/// Host callbacks invoked by command connections.
///
/// Supplied by the embedding application; every method runs on the
/// connection's own task.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Reloads the service; success or failure propagates to the
    /// client.
    ///
    /// # Errors
    /// Returns the reason the reload was refused or failed.
    async fn service_reload(&self) -> anyhow::Result<()>;

    /// Invoked after a close was requested over the socket.
    async fn post_service_close(&self);

    /// Snapshot of the host system-proxy state.
    fn system_proxy_status(&self) -> SystemProxyStatus;

    /// Enables or disables the host system proxy.
    ///
    /// # Errors
    /// Returns the reason the change was refused.
    async fn set_system_proxy_enabled(&self, enabled: bool) -> anyhow::Result<()>;
}
