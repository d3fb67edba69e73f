//! LINSTOR Docker Volume Plugin
//!
//! Serves the Docker volume plugin protocol for volumes provisioned on a
//! LINSTOR cluster. Docker talks to the plugin over the Unix socket under
//! `/run/docker/plugins`; the plugin talks to the LINSTOR controller over
//! its REST API and mounts volumes below `--root`.

use clap::Parser;
use gethostname::gethostname;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use linstor_docker_volume::{
    BackendFactory, ConnectionOverrides, DriverConfig, Error, Listen, PluginConfig, PluginMetrics,
    PluginRouter, PluginServer, PluginServerConfig, Result, SystemMounter, VolumeDriver,
    DEFAULT_CONFIG_PATH,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// LINSTOR Docker Volume Plugin - replicated block volumes for Docker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (INI, [global] section)
    #[arg(long, env = "LS_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Name of this node in the LINSTOR cluster (default: hostname)
    #[arg(long, env = "LS_NODE")]
    node: Option<String>,

    /// Directory holding the volume mount points
    #[arg(long, env = "LS_ROOT", default_value = "/var/lib/docker-volumes/linstor")]
    root: PathBuf,

    /// Unix socket to serve the plugin API on
    #[arg(long, env = "LS_SOCKET", default_value = linstor_docker_volume::controlplane::DEFAULT_SOCKET)]
    socket: PathBuf,

    /// Serve the plugin API on TCP instead of the Unix socket
    #[arg(long, env = "LS_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Metrics server bind address (disabled when unset)
    #[arg(long, env = "LS_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Comma separated LINSTOR controller list
    #[arg(long, env = "LS_CONTROLLERS")]
    controllers: Option<String>,

    /// Controller basic auth user
    #[arg(long, env = "LS_USERNAME")]
    username: Option<String>,

    /// Controller basic auth password
    #[arg(long, env = "LS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// PEM client certificate
    #[arg(long, env = "LS_CERT_FILE")]
    cert_file: Option<PathBuf>,

    /// PEM client key
    #[arg(long, env = "LS_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// PEM CA bundle for the controller certificate
    #[arg(long, env = "LS_CA_FILE")]
    ca_file: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConnectionOverrides {
        ConnectionOverrides {
            controllers: self.controllers.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
            ca_file: self.ca_file.clone(),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let node = match &args.node {
        Some(node) => node.clone(),
        None => hostname()?,
    };

    info!("Starting LINSTOR Docker volume plugin");
    info!("  Version: {}", linstor_docker_volume::VERSION);
    info!("  Node: {}", node);
    info!("  Root: {}", args.root.display());
    info!("  Config: {}", args.config.display());

    let mut config = PluginConfig::load(&args.config)?;
    config.apply_overrides(args.overrides());

    let client = BackendFactory::controller(&config.connection)?;
    let mounter = Arc::new(SystemMounter::new());

    let driver = VolumeDriver::new(
        DriverConfig {
            node,
            root: args.root.clone(),
            defaults: config.defaults,
        },
        client,
        mounter,
    );

    let listen = match &args.listen_addr {
        Some(addr) => Listen::Tcp(parse_addr(addr, "listen")?),
        None => Listen::Unix(args.socket.clone()),
    };
    let metrics_addr = match &args.metrics_addr {
        Some(addr) => Some(parse_addr(addr, "metrics")?),
        None => None,
    };

    let router = PluginRouter::new(driver, PluginMetrics::new()?);
    let server = Arc::new(PluginServer::new(
        PluginServerConfig {
            listen,
            metrics_addr,
        },
        router,
    ));

    let signal_server = server.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_server.shutdown();
    });

    server.run().await?;

    info!("Plugin shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, what: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address '{}': {}", what, addr, e)))
}

fn hostname() -> Result<String> {
    let hostname = gethostname().to_string_lossy().into_owned();
    if hostname.is_empty() {
        return Err(Error::Configuration("hostname is empty, set --node".to_string()));
    }
    Ok(hostname)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,tower=warn,axum=info,reqwest=info",
            level
        ))
    });

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
