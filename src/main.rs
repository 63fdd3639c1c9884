//! burrow CLI - reverse tunnel relay and agent
//!
//! Run the public relay with `burrow server`, or expose a local service
//! through a relay with `burrow agent`.

use anyhow::{Context, Result};
use burrow_agent::{Agent, AgentConfig};
use burrow_server::{Relay, RelayConfig};
use clap::{Args, Parser, Subcommand};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// burrow - expose local services through a public relay
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(about = "burrow - expose local services through a public relay")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the public relay
    #[command(long_about = r#"
Run the public relay: the control listener agents connect to, the data
listener they dial back into, and the public HTTP listener.

EXAMPLES:
  # Run a relay on the default ports (8081 control, 8082 data, 8080 public)
  burrow server

  # Bind the public side somewhere else
  burrow server --public-host 0.0.0.0:80

ENVIRONMENT VARIABLES:
  BURROW_INTERNAL_HOST  Control listener address
  BURROW_DATA_HOST      Data rendezvous listener address
  BURROW_PUBLIC_HOST    Public HTTP listener address
"#)]
    Server(ServerArgs),

    /// Run an agent next to a local service
    #[command(long_about = r#"
Connect to a relay, claim a virtual hostname, and forward every public
request for that hostname to a local service.

EXAMPLES:
  # Expose localhost:3000 as example.test through a local relay
  burrow agent --register-host example.test --service-port 3000

  # Point at a remote relay
  burrow agent --register-host example.test \
    --tunnel-host relay.example.com --tunnel-data-port 8082

ENVIRONMENT VARIABLES:
  BURROW_REGISTER_HOST     Virtual hostname to claim
  BURROW_SERVICE_HOST      Local service host
  BURROW_SERVICE_PORT      Local service port
  BURROW_TUNNEL_HOST       Relay hostname
  BURROW_TUNNEL_DATA_PORT  Relay data port
"#)]
    Agent(AgentArgs),
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Control listener address (agents connect here)
    #[arg(long, env = "BURROW_INTERNAL_HOST")]
    internal_host: Option<SocketAddr>,

    /// Data rendezvous listener address (agents dial back here)
    #[arg(long, env = "BURROW_DATA_HOST")]
    data_host: Option<SocketAddr>,

    /// Public HTTP listener address
    #[arg(long, env = "BURROW_PUBLIC_HOST")]
    public_host: Option<SocketAddr>,

    /// Seconds a parked public connection may wait for its agent
    #[arg(long, env = "BURROW_PENDING_TIMEOUT_SECS")]
    pending_timeout_secs: Option<u64>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct AgentArgs {
    /// Virtual hostname to claim on the relay
    #[arg(long, env = "BURROW_REGISTER_HOST")]
    register_host: Option<String>,

    /// Host of the local service to expose
    #[arg(long, env = "BURROW_SERVICE_HOST")]
    service_host: Option<String>,

    /// Port of the local service to expose
    #[arg(long, env = "BURROW_SERVICE_PORT")]
    service_port: Option<u16>,

    /// Relay hostname
    #[arg(long, env = "BURROW_TUNNEL_HOST")]
    tunnel_host: Option<String>,

    /// Relay data port
    #[arg(long, env = "BURROW_TUNNEL_DATA_PORT")]
    tunnel_data_port: Option<u16>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

/// Server configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
struct ServerConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    internal_host: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_host: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_host: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_timeout_secs: Option<u64>,
}

/// Agent configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
struct AgentConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    register_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tunnel_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tunnel_data_port: Option<u16>,
}

/// Load configuration from a YAML file
fn load_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Merge CLI args with the config file; CLI args take precedence.
fn build_relay_config(args: ServerArgs) -> Result<RelayConfig> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file::<ServerConfigFile>(path)?
        }
        None => ServerConfigFile::default(),
    };

    let defaults = RelayConfig::default();
    Ok(RelayConfig {
        internal_addr: args
            .internal_host
            .or(file.internal_host)
            .unwrap_or(defaults.internal_addr),
        data_addr: args.data_host.or(file.data_host).unwrap_or(defaults.data_addr),
        public_addr: args
            .public_host
            .or(file.public_host)
            .unwrap_or(defaults.public_addr),
        pending_timeout: args
            .pending_timeout_secs
            .or(file.pending_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.pending_timeout),
    })
}

/// Merge CLI args with the config file; CLI args take precedence.
fn build_agent_config(args: AgentArgs) -> Result<AgentConfig> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file::<AgentConfigFile>(path)?
        }
        None => AgentConfigFile::default(),
    };

    let register_host = args
        .register_host
        .or(file.register_host)
        .context("--register-host is required (flag, BURROW_REGISTER_HOST, or config file)")?;

    let defaults = AgentConfig::default();
    Ok(AgentConfig {
        register_host,
        service_host: args
            .service_host
            .or(file.service_host)
            .unwrap_or(defaults.service_host),
        service_port: args
            .service_port
            .or(file.service_port)
            .unwrap_or(defaults.service_port),
        tunnel_host: args
            .tunnel_host
            .or(file.tunnel_host)
            .unwrap_or(defaults.tunnel_host),
        tunnel_control_port: defaults.tunnel_control_port,
        tunnel_data_port: args
            .tunnel_data_port
            .or(file.tunnel_data_port)
            .unwrap_or(defaults.tunnel_data_port),
    })
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let config = build_relay_config(args)?;
    let relay = Relay::bind(config).await.context("Failed to start relay")?;

    info!(
        control = %relay.control_addr(),
        data = %relay.data_addr(),
        public = %relay.public_addr(),
        "relay started"
    );

    relay.run().await.context("Relay terminated")?;
    Ok(())
}

async fn run_agent(args: AgentArgs) -> Result<()> {
    let config = build_agent_config(args)?;
    let agent = Agent::new(config).context("Invalid agent configuration")?;

    agent.run().await.context("Agent terminated")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --log-level takes anything EnvFilter understands, so directives
    // like "info,burrow_server=debug" work too.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("unrecognized log level '{}'", cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Agent(args) => run_agent(args).await,
    }
}
