//! Switchyard gateway entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hyper::header::HeaderValue;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use switchyard::config::{Config, ListenConfig};
use switchyard::pipeline::{create_http_client, Pipeline};
use switchyard::proxy::{create_tls_acceptor, Gateway, ListenerFanIn};
use switchyard::rules::Router;
use switchyard::scripting::RhaiScriptRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Rule-driven reverse-proxy gateway
#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rules file (YAML)
    #[arg(short = 'r', long = "rules", env = "SWITCHYARD_RULES")]
    rules: PathBuf,

    /// Directory holding extension scripts for `call`
    #[arg(short = 'a', long = "actions", env = "SWITCHYARD_ACTIONS", default_value = ".")]
    actions: PathBuf,

    /// Comma-separated listening ports; each serves both HTTP and TLS
    #[arg(short = 'p', long = "ports", env = "SWITCHYARD_PORTS", default_value = "80")]
    ports: String,

    /// Log filter directive, e.g. `info` or `switchyard=debug`
    #[arg(long, env = "SWITCHYARD_LOG", default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Value of the `x-switchyard-version` response header
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    version_tag: String,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_file(&args.rules)?;
    let router = Router::from_rules(&config.rules)?;
    let listen = ListenConfig::parse_ports(&args.ports)?;
    let tls_acceptor = create_tls_acceptor(&config.certificates)?;
    let version = HeaderValue::from_str(&args.version_tag)
        .with_context(|| format!("invalid version tag '{}'", args.version_tag))?;

    let scripts = RhaiScriptRunner::new(&args.actions)
        .context("failed to create script HTTP client")?;
    let pipeline = Pipeline::new(create_http_client()?, Arc::new(scripts));

    info!(
        version = %args.version_tag,
        rules = %args.rules.display(),
        actions = %args.actions.display(),
        ports = ?listen.ports,
        "Starting switchyard"
    );

    let fan_in = ListenerFanIn::bind(&listen.addrs())?;
    let gateway = Gateway::new(router, pipeline, tls_acceptor, version);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    gateway.run(fan_in, shutdown).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
