// ============================================
// File: crates/veilink-service/src/command/server.rs
// ============================================
//! # Command Server
//!
//! ## Creation Reason
//! Accepts local control connections, multiplexes the command set, and
//! maintains the bounded log history that doubles as the process-wide
//! log sink while the server is active.
//!
//! ## Transport
//! A unix socket at `<base_path>/<socket_name>` (stale file removed
//! before rebinding, ownership chowned when configured), or a loopback
//! TCP listener on platforms without unix sockets.
//!
//! ## Concurrency
//! The accept loop runs independently of all connection handlers; each
//! accepted connection is handled on its own task. Handler errors are
//! swallowed except for best-effort diagnostic logging, suppressed
//! entirely during listener shutdown.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `start` installs the broker as the process-wide log sink; `stop`
//!   MUST restore the no-op sink so log calls after shutdown never
//!   block or fault
//! - One command per connection; the handler owns the connection until
//!   it closes it

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use veilink_core::protocol::{CommandCode, ProtocolCodec, ServiceStatus};

use crate::command::CommandHandler;
use crate::config::ControlConfig;
use crate::error::{Result, ServiceError};
use crate::logging::{LogBroker, LogSink, SinkRegistry};
use crate::service::Service;

// ============================================
// Connection Abstraction
// ============================================

/// One accepted control connection, unix or TCP.
pub(crate) trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

type CommandStream = Box<dyn Connection>;

enum CommandListener {
    #[cfg(unix)]
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl CommandListener {
    async fn accept(&self) -> std::io::Result<CommandStream> {
        match self {
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }
}

// ============================================
// CommandServer
// ============================================

/// The control-plane server: accept loop, command handlers, log
/// distribution.
pub struct CommandServer {
    config: ControlConfig,
    handler: Arc<dyn CommandHandler>,
    broker: Arc<LogBroker>,
    registry: Arc<SinkRegistry>,
    service: RwLock<Option<Arc<Service>>>,
    shutdown: broadcast::Sender<()>,
    shutting_down: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    bound_path: Mutex<Option<PathBuf>>,
    bound_tcp: Mutex<Option<SocketAddr>>,
}

impl CommandServer {
    /// Creates a stopped command server.
    ///
    /// `registry` is the process-wide sink registry shared with the
    /// tracing layer; `max_lines` bounds the log history.
    #[must_use]
    pub fn new(
        config: ControlConfig,
        handler: Arc<dyn CommandHandler>,
        registry: Arc<SinkRegistry>,
        max_lines: usize,
    ) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            handler,
            broker: Arc::new(LogBroker::new(max_lines)),
            registry,
            service: RwLock::new(None),
            shutdown,
            shutting_down: AtomicBool::new(false),
            accept_task: Mutex::new(None),
            bound_path: Mutex::new(None),
            bound_tcp: Mutex::new(None),
        })
    }

    /// Attaches the running service consulted by STATUS and
    /// CLOSE_CONNECTIONS.
    pub fn set_service(&self, service: Arc<Service>) {
        *self.service.write() = Some(service);
    }

    /// Detaches the service reference.
    pub fn clear_service(&self) {
        *self.service.write() = None;
    }

    /// The server's log broker (history plus broadcast).
    #[must_use]
    pub fn broker(&self) -> &Arc<LogBroker> {
        &self.broker
    }

    /// Invalidates every in-flight LOG stream without touching the
    /// listener.
    pub fn reset_log_streams(&self) {
        self.broker.reset_streams();
    }

    /// Address of the TCP listener, when bound in TCP mode.
    #[must_use]
    pub fn tcp_local_addr(&self) -> Option<SocketAddr> {
        *self.bound_tcp.lock()
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Binds the listener, installs the log sink, and spawns the
    /// accept loop.
    ///
    /// # Errors
    /// Returns listen/ownership errors; the sink is not installed on
    /// failure.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.shutting_down.store(false, Ordering::SeqCst);
        self.registry
            .install(Arc::clone(&self.broker) as Arc<dyn LogSink>);

        let server = Arc::clone(self);
        let shutdown_rx = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            server.accept_loop(listener, shutdown_rx).await;
        });
        *self.accept_task.lock() = Some(task);
        info!("command server started");
        Ok(())
    }

    async fn bind(&self) -> Result<CommandListener> {
        if self.config.use_tcp {
            let listener = TcpListener::bind(self.config.tcp_listen)
                .await
                .map_err(|e| {
                    ServiceError::listen(self.config.tcp_listen.to_string(), e.to_string())
                })?;
            let local = listener
                .local_addr()
                .map_err(|e| ServiceError::listen("tcp", e.to_string()))?;
            *self.bound_tcp.lock() = Some(local);
            debug!("command server listening on tcp {}", local);
            return Ok(CommandListener::Tcp(listener));
        }

        #[cfg(unix)]
        {
            let path = self.config.socket_path();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ServiceError::listen(path.display().to_string(), e.to_string())
                })?;
            }
            // Remove a stale socket left by a previous instance.
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
            let listener = UnixListener::bind(&path)
                .map_err(|e| ServiceError::listen(path.display().to_string(), e.to_string()))?;
            if let Err(e) = self.apply_socket_ownership(&path) {
                drop(listener);
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
            debug!("command server listening on {}", path.display());
            *self.bound_path.lock() = Some(path);
            Ok(CommandListener::Unix(listener))
        }

        #[cfg(not(unix))]
        {
            Err(ServiceError::listen(
                "unix",
                "unix sockets unavailable; set control.use_tcp",
            ))
        }
    }

    #[cfg(unix)]
    fn apply_socket_ownership(&self, path: &std::path::Path) -> Result<()> {
        use nix::unistd::{chown, Gid, Group, Uid, User};

        if self.config.owner.is_none() && self.config.group.is_none() {
            return Ok(());
        }

        let mut uid: Option<Uid> = None;
        let mut gid: Option<Gid> = None;
        if let Some(owner) = &self.config.owner {
            let user = User::from_name(owner)
                .map_err(|e| ServiceError::SocketOwnership {
                    reason: e.to_string(),
                })?
                .ok_or_else(|| ServiceError::SocketOwnership {
                    reason: format!("unknown user '{owner}'"),
                })?;
            uid = Some(user.uid);
            gid = Some(user.gid);
        }
        if let Some(group) = &self.config.group {
            let group = Group::from_name(group)
                .map_err(|e| ServiceError::SocketOwnership {
                    reason: e.to_string(),
                })?
                .ok_or_else(|| ServiceError::SocketOwnership {
                    reason: format!("unknown group '{group}'"),
                })?;
            gid = Some(group.gid);
        }

        chown(path, uid, gid).map_err(|e| ServiceError::SocketOwnership {
            reason: e.to_string(),
        })
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: CommandListener,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream).await {
                                // Expected during listener shutdown.
                                if !server.is_shutting_down() {
                                    debug!("command connection error: {}", e);
                                }
                            }
                        });
                    }
                    Err(e) => {
                        if self.is_shutting_down() {
                            break;
                        }
                        error!("command accept error: {}", e);
                    }
                },
            }
        }
        debug!("command accept loop exiting");
    }

    async fn handle_connection(&self, mut stream: CommandStream) -> veilink_core::Result<()> {
        let command = ProtocolCodec::read_command(&mut stream).await?;
        debug!("command connection: {}", command);
        match command {
            CommandCode::Log => self.handle_log(stream).await,
            CommandCode::Status => {
                let status = self.status_snapshot();
                ProtocolCodec::write_status(&mut stream, &status).await
            }
            CommandCode::ServiceReload => {
                let result = self
                    .handler
                    .service_reload()
                    .await
                    .map_err(|e| e.to_string());
                ProtocolCodec::write_result(&mut stream, &result).await
            }
            CommandCode::ServiceClose => {
                ProtocolCodec::write_result(&mut stream, &Ok(())).await?;
                self.handler.post_service_close().await;
                Ok(())
            }
            CommandCode::CloseConnections => {
                let service = self.service.read().clone();
                let closed = match service {
                    Some(service) => service.reset_connections().await,
                    None => 0,
                };
                debug!("close-connections: {} flows terminated", closed);
                ProtocolCodec::write_result(&mut stream, &Ok(())).await
            }
            CommandCode::GetSystemProxy => {
                let status = self.handler.system_proxy_status();
                ProtocolCodec::write_system_proxy_status(&mut stream, &status).await
            }
            CommandCode::SetSystemProxy => {
                let enabled = ProtocolCodec::read_bool(&mut stream).await?;
                let result = self
                    .handler
                    .set_system_proxy_enabled(enabled)
                    .await
                    .map_err(|e| e.to_string());
                ProtocolCodec::write_result(&mut stream, &result).await
            }
        }
    }

    /// LOG: flush the history, then forward records until the client
    /// disconnects or the stream generation is reset.
    async fn handle_log(&self, mut stream: CommandStream) -> veilink_core::Result<()> {
        let mut subscription = self.broker.subscribe();
        while let Some(record) = subscription.next().await {
            ProtocolCodec::write_log_record(&mut stream, &record).await?;
        }
        Ok(())
    }

    fn status_snapshot(&self) -> ServiceStatus {
        self.service
            .read()
            .as_ref()
            .map_or_else(ServiceStatus::default, |service| service.status())
    }

    /// Stops the listener, restores the no-op sink, and ends every
    /// LOG stream.
    pub async fn stop(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        // Restore first: log calls after shutdown never block or fault.
        self.registry.restore_noop();
        let _ = self.shutdown.send(());
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.broker.reset_streams();
        *self.bound_tcp.lock() = None;
        #[cfg(unix)]
        if let Some(path) = self.bound_path.lock().take() {
            let _ = std::fs::remove_file(path);
        }
        info!("command server stopped");
    }
}

impl std::fmt::Debug for CommandServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandServer")
            .field("use_tcp", &self.config.use_tcp)
            .field("history_len", &self.broker.len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
