//! Ferrite Registry - content-addressable container image registry

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, to_factory_params};
use ferrite_api::{AppState, MetricsHandle, create_router};
use ferrite_core::cache::{MetricsCacheProvider, install_default_cache_providers};
use ferrite_core::{Registry, create_cache_provider, spawn_purge_task};
use ferrite_storage::middleware::{apply_middleware, install_default_middleware};
use ferrite_storage::{Regulator, StorageDriver, create_driver, install_default_drivers};

/// Ferrite Registry - content-addressable container image registry
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/registry.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "FERRITE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "FERRITE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // A missing config file means defaults; a malformed one is fatal.
    let config = if std::path::Path::new(&args.config).exists() {
        Config::load(&args.config)?
    } else {
        eprintln!("config file {} not found, using defaults", args.config);
        Config::default()
    };

    init_logging(&config.logging.level);
    info!("Starting Ferrite Registry v{}", env!("CARGO_PKG_VERSION"));

    // Pluggable implementations register at startup, never lazily.
    install_default_drivers();
    install_default_middleware();
    install_default_cache_providers();

    // Storage driver, capped by the regulator, then wrapped by any
    // configured URL middleware (innermost entry first).
    let driver_config = &config.storage.driver;
    let raw_driver = create_driver(
        &driver_config.name,
        &to_factory_params(&driver_config.params),
    )
    .with_context(|| format!("creating storage driver {}", driver_config.name))?;
    info!(
        "Using storage driver: {} (max concurrency {})",
        raw_driver.name(),
        driver_config.max_concurrency
    );
    let mut driver: Arc<dyn StorageDriver> = Arc::new(Regulator::new(
        raw_driver,
        driver_config.max_concurrency,
    ));
    for entry in &config.middleware.storage {
        driver = apply_middleware(&entry.name, driver, &to_factory_params(&entry.options))
            .with_context(|| format!("applying storage middleware {}", entry.name))?;
        info!("Applied storage middleware: {}", entry.name);
    }

    // Descriptor cache, observed through the metrics wrapper.
    let cache: Option<Arc<dyn ferrite_core::BlobDescriptorCacheProvider>> = match &config
        .storage
        .cache
    {
        Some(cache_config) => {
            let provider =
                create_cache_provider(&cache_config.name, &to_factory_params(&cache_config.params))
                    .await
                    .with_context(|| format!("creating cache provider {}", cache_config.name))?;
            info!("Using blob descriptor cache: {}", cache_config.name);
            Some(Arc::new(MetricsCacheProvider::new(provider)) as _)
        }
        None => None,
    };

    let registry = Arc::new(Registry::new(driver.clone(), cache));

    // Access controller, when an auth scheme is configured.
    let auth = match &config.auth {
        Some(auth_config) => Some(
            ferrite_auth::create_access_controller(
                &auth_config.scheme,
                &to_factory_params(&auth_config.params),
            )
            .with_context(|| format!("creating access controller {}", auth_config.scheme))?,
        ),
        None => None,
    };

    // Background reclamation of abandoned upload sessions.
    let purge_config = config.storage.maintenance.uploadpurging.to_purge_config();
    let _purge_handle = spawn_purge_task(driver.clone(), purge_config);

    let metrics_handle = init_metrics();

    let state = AppState::new(registry, auth, config.http.disable_redirect)
        .with_delete_enabled(config.storage.delete.enabled);
    let app = create_router(state, metrics_handle.map(Arc::new)).layer(TraceLayer::new_for_http());

    let bind_addr = args.bind.unwrap_or(config.http.bind_address);
    let port = args.port.unwrap_or(config.http.port);
    let addr: SocketAddr = format!("{bind_addr}:{port}")
        .parse()
        .context("invalid bind address")?;

    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Initialize Prometheus metrics
fn init_metrics() -> Option<MetricsHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics enabled at /metrics");

            metrics::describe_counter!(
                "ferrite_cache_requests_total",
                "Total descriptor cache operations"
            );
            metrics::describe_counter!(
                "ferrite_cache_hits_total",
                "Descriptor cache operations that found an entry"
            );
            metrics::describe_counter!(
                "ferrite_cache_misses_total",
                "Descriptor cache operations that found nothing"
            );
            metrics::describe_histogram!(
                "ferrite_cache_operation_duration_seconds",
                "Descriptor cache operation latency"
            );

            Some(handle)
        }
        Err(e) => {
            tracing::warn!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
