//! VLESS User Registry CLI
//!
//! Administrative front for the user registry, plus a `serve` mode exposing
//! Prometheus metrics and health probes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         vless-userdb                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Config     │───▶│  Validator   │───▶│   Storage    │       │
//! │  │   (YAML)     │    │  + Cache     │    │  (SQL/mem)   │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             │                                   │
//! │               ┌─────────────┴─────────────┐                     │
//! │               ▼                           ▼                     │
//! │     admin commands (JSON)      serve: /metrics, /healthz         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use prometheus::Registry;
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use vless_userdb::config::{CacheSettings, Config, StorageConfig};
use vless_userdb::error::{Error, Result};
use vless_userdb::{UserRecord, Validator};

// =============================================================================
// CLI Arguments
// =============================================================================

/// VLESS user registry - user lookup with a TTL/LRU cache over SQL storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (in-memory storage with default caching if omitted)
    #[arg(long, env = "USERDB_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up a user by UUID
    Get { id: Uuid },

    /// Look up a user by email
    GetByEmail { email: String },

    /// List all users
    List,

    /// Count users
    Count,

    /// Add a VLESS user
    Add {
        #[arg(long)]
        id: Uuid,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = "")]
        flow: String,
    },

    /// Delete a user by email
    Del { email: String },

    /// Serve metrics and health endpoints until interrupted
    Serve {
        /// Metrics server bind address
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
        metrics_addr: String,

        /// Health server bind address
        #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
        health_addr: String,

        /// Interval between cache statistics log lines
        #[arg(long, env = "STATS_INTERVAL_SECONDS", default_value = "60")]
        stats_interval_seconds: u64,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    info!(
        storage = %config.storage.kind,
        cache_enabled = config.cache.is_some(),
        "Starting user registry"
    );

    let validator = Validator::from_config(&config).await.map_err(|e| {
        error!("Failed to initialise validator: {}", e);
        e
    })?;

    let result = run_command(&validator, args.command).await;

    if let Err(e) = validator.close().await {
        error!("Failed to close storage: {}", e);
    }

    if let Err(e) = &result {
        error!("Command failed: {}", e);
    }
    result
}

fn load_config(args: &Args) -> Result<Config> {
    match &args.config {
        Some(path) => Config::from_file(path),
        None => Ok(Config {
            storage: StorageConfig::memory(),
            cache: Some(CacheSettings::default()),
        }),
    }
}

async fn run_command(validator: &Validator, command: Command) -> Result<()> {
    match command {
        Command::Get { id } => print_json(&validator.get(id).await),
        Command::GetByEmail { email } => print_json(&validator.get_by_email(&email).await),
        Command::List => print_json(&validator.get_all().await),
        Command::Count => print_json(&validator.get_count().await),
        Command::Add { id, email, flow } => {
            let user = UserRecord::vless(id, email, flow);
            validator.add(user.clone()).await?;
            print_json(&user)
        }
        Command::Del { email } => {
            validator.del(&email).await?;
            info!(email = %email, "User deleted");
            Ok(())
        }
        Command::Serve {
            metrics_addr,
            health_addr,
            stats_interval_seconds,
        } => {
            serve(
                validator,
                &metrics_addr,
                &health_addr,
                Duration::from_secs(stats_interval_seconds.max(1)),
            )
            .await
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    use std::io::Write;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
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

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "sqlx=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr so command output on stdout stays machine-readable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Serve
// =============================================================================

async fn serve(
    validator: &Validator,
    metrics_addr: &str,
    health_addr: &str,
    stats_interval: Duration,
) -> Result<()> {
    let registry = Arc::new(Registry::new());
    validator.metrics().register(&registry)?;

    let ready = Arc::new(AtomicBool::new(true));
    let servers = futures::future::try_join(
        run_health_server(health_addr, ready.clone()),
        run_metrics_server(metrics_addr, registry),
    );
    tokio::pin!(servers);

    let mut ticker = tokio::time::interval(stats_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut servers => {
                ready.store(false, Ordering::Release);
                result?;
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                ready.store(false, Ordering::Release);
                return Ok(());
            }
            _ = ticker.tick() => log_cache_stats(validator),
        }
    }
}

fn log_cache_stats(validator: &Validator) {
    let Some(cache) = validator.cache() else {
        return;
    };
    let stats = cache.stats();
    info!(
        resident = stats.resident,
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        expirations = stats.expirations,
        hit_ratio = stats.hit_ratio(),
        "Cache statistics"
    );
}

// =============================================================================
// Health Server
// =============================================================================

mod reply {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Response, StatusCode};

    pub type Body = Full<Bytes>;

    pub fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Body> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    pub fn with_content_type(mut response: Response<Body>, content_type: &'static str) -> Response<Body> {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let ready = ready.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let ready = ready.load(Ordering::Acquire);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => reply::response(StatusCode::OK, "ok"),
                        "/readyz" if ready => reply::response(StatusCode::OK, "ok"),
                        "/readyz" => reply::response(StatusCode::SERVICE_UNAVAILABLE, "shutting down"),
                        _ => reply::response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Arc<Registry>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let registry = registry.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match vless_userdb::metrics::encode_text(&registry) {
                            Ok(text) => reply::with_content_type(
                                reply::response(StatusCode::OK, text),
                                prometheus::TEXT_FORMAT,
                            ),
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                reply::response(StatusCode::INTERNAL_SERVER_ERROR, "encode error")
                            }
                        },
                        _ => reply::response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
