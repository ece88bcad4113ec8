// ============================================
// File: crates/veilink-service/src/lib.rs
// ============================================
//! # Veilink Service - On-Device Runtime Bridge
//!
//! ## Creation Reason
//! The runtime bridge of a TUN-based proxy client: owns the local
//! virtual interface, forwards captured IP traffic into the embedded
//! proxying engine, and exposes a local control-plane socket for the
//! host application.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`service`]: host-owned lifecycle (start order, hard-stop timeout)
//! - [`command`]: control-plane socket server and client
//! - [`bridge`]: data-plane tun bridge and flow copy pairs
//! - [`monitor`]: default-interface monitor
//! - [`logging`]: bounded log history, broadcast, sink injection
//! - [`config`]: TOML configuration
//! - [`error`]: service error types
//!
//! ## Architecture Overview
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       Host Application                        │
//! │        │ start/close                  │ command socket        │
//! │        ▼                              ▼                       │
//! │  ┌──────────┐                  ┌───────────────┐              │
//! │  │ Service  │                  │ CommandServer │◄── LOG/STATUS│
//! │  │          │◄────────────────►│  + LogBroker  │    RELOAD/.. │
//! │  └────┬─────┘   status/reset   └───────┬───────┘              │
//! │       │                                │ installs             │
//! │       ▼                                ▼                      │
//! │  ┌──────────┐   flows   ┌─────────┐  SinkRegistry ◄── tracing │
//! │  │ TunBridge│──────────►│ Engine  │                           │
//! │  │ +Monitor │  dispatch │ (opaque)│                           │
//! │  └──────────┘           └─────────┘                           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Control Flow
//! The host starts the command server first (so early startup logs are
//! captured), builds the engine from configuration, then starts the
//! service; shutdown reverses the order under a hard timeout.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The two concurrency domains (control plane, data plane) share
//!   only the sink registry and a read-mostly service reference
//! - No automatic retries anywhere in this crate; recovery means the
//!   host recreates the whole service

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod service;

// Re-export primary types
pub use command::{CommandClient, CommandHandler, CommandServer};
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use service::{Service, ShutdownOutcome};
