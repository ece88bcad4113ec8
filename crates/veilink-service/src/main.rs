// ============================================
// File: crates/veilink-service/src/main.rs
// ============================================
//! # veilinkctl - Command Socket Client
//!
//! ## Creation Reason
//! Control utility for a running Veilink instance: talks the command
//! socket protocol, streams logs, and validates configuration files.
//! The service itself is a library embedded by host applications;
//! this binary is the operator's side of the socket.
//!
//! ## Usage
//! ```bash
//! veilinkctl status                 # service snapshot
//! veilinkctl status --json          # machine-readable
//! veilinkctl logs                   # history replay + live tail
//! veilinkctl reload                 # invoke the host reload hook
//! veilinkctl close-connections      # terminate all active flows
//! veilinkctl system-proxy get
//! veilinkctl system-proxy set on
//! veilinkctl check-config           # validate a config file
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The socket path comes from the same config file the host uses;
//!   pass `--config` when it is not at the default location

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

use veilink_service::command::CommandClient;
use veilink_service::config::ServiceConfig;
use veilink_service::logging::{init_tracing, SinkRegistry};

// ============================================
// CLI Definition
// ============================================

/// Veilink control utility.
#[derive(Parser, Debug)]
#[command(name = "veilinkctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the service configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/veilink/service.toml"
    )]
    config: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a point-in-time service status snapshot.
    Status {
        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Replay the log history and follow live records.
    Logs,

    /// Invoke the host reload hook.
    Reload,

    /// Force termination of all active flows.
    CloseConnections,

    /// Query or set the host system proxy.
    SystemProxy {
        #[command(subcommand)]
        action: SystemProxyAction,
    },

    /// Validate a configuration file.
    CheckConfig,
}

#[derive(Subcommand, Debug)]
enum SystemProxyAction {
    /// Show the current system-proxy state.
    Get,
    /// Enable or disable the system proxy.
    Set {
        /// Desired state.
        state: ProxyState,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProxyState {
    On,
    Off,
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing("warn", std::sync::Arc::new(SinkRegistry::new()));

    let result = run(cli).await;
    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::CheckConfig = cli.command {
        return check_config(&cli.config).await;
    }

    let client = client_for(&cli.config).await?;
    match cli.command {
        Commands::Status { json } => {
            let status = client.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("running:     {}", status.running);
                println!("flows:       {}", status.active_flows);
                println!("uplink:      {} bytes", status.uplink_bytes);
                println!("downlink:    {} bytes", status.downlink_bytes);
                println!("uptime:      {}s", status.uptime_secs);
            }
        }
        Commands::Logs => {
            let mut tail = client.follow_logs().await?;
            while let Some(record) = tail.next().await? {
                println!("{record}");
            }
        }
        Commands::Reload => match client.service_reload().await? {
            Ok(()) => println!("reload ok"),
            Err(reason) => anyhow::bail!("reload failed: {reason}"),
        },
        Commands::CloseConnections => {
            client
                .close_connections()
                .await?
                .map_err(|reason| anyhow::anyhow!("close-connections failed: {reason}"))?;
            println!("connections closed");
        }
        Commands::SystemProxy { action } => match action {
            SystemProxyAction::Get => {
                let status = client.system_proxy_status().await?;
                println!("available:   {}", status.available);
                println!("enabled:     {}", status.enabled);
            }
            SystemProxyAction::Set { state } => {
                let enabled = matches!(state, ProxyState::On);
                client
                    .set_system_proxy_enabled(enabled)
                    .await?
                    .map_err(|reason| anyhow::anyhow!("set system proxy failed: {reason}"))?;
                println!("system proxy {}", if enabled { "enabled" } else { "disabled" });
            }
        },
        Commands::CheckConfig => unreachable!("handled above"),
    }
    Ok(())
}

// ============================================
// Helpers
// ============================================

/// Builds a command client from the config's control section; missing
/// config files fall back to defaults.
async fn client_for(config_path: &PathBuf) -> anyhow::Result<CommandClient> {
    let config = if config_path.exists() {
        ServiceConfig::load(config_path).await?
    } else {
        ServiceConfig::default()
    };

    if config.control.use_tcp {
        return Ok(CommandClient::tcp(config.control.tcp_listen));
    }
    #[cfg(unix)]
    {
        Ok(CommandClient::unix(config.control.socket_path()))
    }
    #[cfg(not(unix))]
    {
        anyhow::bail!("unix sockets unavailable on this platform; set control.use_tcp")
    }
}

/// Validates a configuration file and prints a short summary.
async fn check_config(path: &PathBuf) -> anyhow::Result<()> {
    if !path.exists() {
        println!("config file not found: {}", path.display());
        println!("the service will use default values");
        return Ok(());
    }

    let config = ServiceConfig::load(path).await?;
    println!("configuration is valid");
    println!();
    println!("control:");
    if config.control.use_tcp {
        println!("  listen:     tcp {}", config.control.tcp_listen);
    } else {
        println!("  listen:     {}", config.control.socket_path().display());
    }
    println!();
    println!("tunnel:");
    for prefix in &config.tunnel.options.inet4_address {
        println!("  inet4:      {prefix}");
    }
    for prefix in &config.tunnel.options.inet6_address {
        println!("  inet6:      {prefix}");
    }
    println!("  mtu:        {}", config.tunnel.options.mtu);
    println!("  auto_route: {}", config.tunnel.options.auto_route);
    println!();
    println!("log:");
    println!("  max_lines:  {}", config.log.max_lines);
    println!("  level:      {}", config.log.level);
    println!();
    println!("shutdown:");
    println!("  timeout:    {}s", config.shutdown.timeout_secs);
    Ok(())
}
