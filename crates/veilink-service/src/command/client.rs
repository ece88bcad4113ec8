// ============================================
// File: crates/veilink-service/src/command/client.rs
// ============================================
//! # Command Client
//!
//! ## Creation Reason
//! Typed client for the command socket, used by the `veilinkctl`
//! binary and by host applications that prefer not to hand-roll the
//! wire protocol.
//!
//! ## Connection Model
//! One connection per command: connect, send the command byte, read
//! the command-specific response, done. LOG connections stay open and
//! stream records until the server ends them.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use veilink_common::types::LogRecord;
use veilink_core::error::CoreError;
use veilink_core::protocol::{CommandCode, ProtocolCodec, ServiceStatus, SystemProxyStatus};

use crate::error::{Result, ServiceError};

// ============================================
// Endpoint
// ============================================

/// Where the command server listens.
#[derive(Debug, Clone)]
enum Endpoint {
    #[cfg(unix)]
    Unix(PathBuf),
    Tcp(SocketAddr),
}

trait ClientStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ClientStream for T {}

type Stream = Box<dyn ClientStream>;

// ============================================
// CommandClient
// ============================================

/// Client side of the command socket.
#[derive(Debug, Clone)]
pub struct CommandClient {
    endpoint: Endpoint,
}

impl CommandClient {
    /// Client for a unix command socket.
    #[cfg(unix)]
    #[must_use]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: Endpoint::Unix(path.into()),
        }
    }

    /// Client for a loopback TCP command socket.
    #[must_use]
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            endpoint: Endpoint::Tcp(addr),
        }
    }

    async fn connect(&self, command: CommandCode) -> Result<Stream> {
        let mut stream: Stream = match &self.endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => Box::new(
                UnixStream::connect(path)
                    .await
                    .map_err(ServiceError::Io)?,
            ),
            Endpoint::Tcp(addr) => Box::new(
                TcpStream::connect(addr)
                    .await
                    .map_err(ServiceError::Io)?,
            ),
        };
        ProtocolCodec::write_command(&mut stream, command).await?;
        Ok(stream)
    }

    /// STATUS: point-in-time service snapshot.
    ///
    /// # Errors
    /// Returns connection or protocol errors.
    pub async fn status(&self) -> Result<ServiceStatus> {
        let mut stream = self.connect(CommandCode::Status).await?;
        Ok(ProtocolCodec::read_status(&mut stream).await?)
    }

    /// SERVICE_RELOAD: invoke the host reload hook.
    ///
    /// The outer error covers transport; the inner result is the
    /// host's verdict.
    ///
    /// # Errors
    /// Returns connection or protocol errors.
    pub async fn service_reload(&self) -> Result<std::result::Result<(), String>> {
        let mut stream = self.connect(CommandCode::ServiceReload).await?;
        Ok(ProtocolCodec::read_result(&mut stream).await?)
    }

    /// SERVICE_CLOSE: invoke the host post-close hook.
    ///
    /// # Errors
    /// Returns connection or protocol errors.
    pub async fn service_close(&self) -> Result<std::result::Result<(), String>> {
        let mut stream = self.connect(CommandCode::ServiceClose).await?;
        Ok(ProtocolCodec::read_result(&mut stream).await?)
    }

    /// CLOSE_CONNECTIONS: force termination of all active flows.
    ///
    /// # Errors
    /// Returns connection or protocol errors.
    pub async fn close_connections(&self) -> Result<std::result::Result<(), String>> {
        let mut stream = self.connect(CommandCode::CloseConnections).await?;
        Ok(ProtocolCodec::read_result(&mut stream).await?)
    }

    /// GET_SYSTEM_PROXY: host system-proxy snapshot.
    ///
    /// # Errors
    /// Returns connection or protocol errors.
    pub async fn system_proxy_status(&self) -> Result<SystemProxyStatus> {
        let mut stream = self.connect(CommandCode::GetSystemProxy).await?;
        Ok(ProtocolCodec::read_system_proxy_status(&mut stream).await?)
    }

    /// SET_SYSTEM_PROXY: toggle the host system proxy.
    ///
    /// # Errors
    /// Returns connection or protocol errors.
    pub async fn set_system_proxy_enabled(
        &self,
        enabled: bool,
    ) -> Result<std::result::Result<(), String>> {
        let mut stream = self.connect(CommandCode::SetSystemProxy).await?;
        ProtocolCodec::write_bool(&mut stream, enabled).await?;
        Ok(ProtocolCodec::read_result(&mut stream).await?)
    }

    /// LOG: history replay followed by a live tail.
    ///
    /// # Errors
    /// Returns connection errors.
    pub async fn follow_logs(&self) -> Result<LogTail> {
        let stream = self.connect(CommandCode::Log).await?;
        Ok(LogTail { stream })
    }
}

// ============================================
// LogTail
// ============================================

/// An open LOG stream.
pub struct LogTail {
    stream: Stream,
}

impl LogTail {
    /// Reads the next record.
    ///
    /// # Returns
    /// `Ok(None)` when the server ended the stream (reset or
    /// shutdown).
    ///
    /// # Errors
    /// Returns protocol errors for malformed frames.
    pub async fn next(&mut self) -> Result<Option<LogRecord>> {
        match ProtocolCodec::read_log_record(&mut self.stream).await {
            Ok(record) => Ok(Some(record)),
            Err(CoreError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for LogTail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogTail").finish_non_exhaustive()
    }
}
