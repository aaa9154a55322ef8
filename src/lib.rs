//! Transcode Conductor - control plane for a distributed HLS transcoding fleet.
//!
//! Couples an upstream stream of transcoding requests to a pool of remote
//! workers over a message broker, observes each task to completion and
//! records finished streams in a playback library.

pub mod admin;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fabric;
pub mod library;
pub mod metrics;
pub mod resolve;
pub mod taskqueue;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::admin::AdminServer;
use crate::cli::{Cli, Commands, RunArgs};
use crate::config::model::RedisConfig;
use crate::dispatch::{Dispatcher, Sweeper};
use crate::fabric::{RedisFabric, RequestIntake};
use crate::library::Library;
use crate::metrics::Metrics;
use crate::resolve::HttpResolver;
use crate::taskqueue::TaskStore;

/// Runs the conductor with the provided CLI arguments.
pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.log_level())?;

    match cli.command {
        Commands::Run(args) => run_conductor(args, &cli.config).await,
        Commands::ConfigValidate => validate_config(&cli.config).await,
        Commands::ConfigShow => show_config(&cli.config).await,
        Commands::TasksList => list_tasks(&cli.config).await,
        Commands::TasksPurge { days } => purge_tasks(&cli.config, days).await,
    }
}

/// Initializes the tracing subscriber for structured logging.
fn setup_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .init();

    Ok(())
}

/// Starts the full control plane and blocks until shutdown.
async fn run_conductor(args: RunArgs, config_path: &Path) -> Result<()> {
    info!("starting transcode conductor");

    let config = config::loader::load_and_validate(config_path)?;
    info!("configuration loaded and validated");

    let pool = connect_database(&config.database.path).await?;
    taskqueue::init_schema(&pool).await?;
    library::init_schema(&pool).await?;
    let store = TaskStore::new(pool.clone());

    let metrics = Arc::new(Metrics::new()?);
    let resolver = Arc::new(HttpResolver::new(&config.library.resolver_api));
    let library = Arc::new(Library::new(
        pool.clone(),
        config.library.storages.clone(),
        resolver,
    ));

    let stop = CancellationToken::new();

    let admin = AdminServer::new(
        library.clone(),
        metrics.clone(),
        &config.admin.token,
        &config.admin.bind,
    );
    let admin_addr = admin.start(stop.clone()).await?;
    info!(addr = %admin_addr, "admin http server started");

    let redis_url = build_redis_url(&config.redis);
    let fabric = RedisFabric::new(
        &redis_url,
        store.clone(),
        config.timings.clone(),
        metrics.clone(),
    )
    .await?;
    info!("connected to broker");

    let intake = RequestIntake::new(&redis_url, config.timings.clone()).await?;
    let requests = intake.start(stop.clone());
    let active_tasks = fabric
        .start_consuming(stop.clone(), !args.skip_restore)
        .await?;

    let sweeper = Sweeper::new(store.clone(), metrics.clone(), config.timings.clone());
    let sweeper_stop = stop.clone();
    tokio::spawn(async move {
        sweeper.run(sweeper_stop).await;
    });

    let dispatcher = Dispatcher::new(
        store,
        library,
        metrics,
        config.timings.request_silence(),
    );
    let dispatcher_stop = stop.clone();
    tokio::spawn(async move {
        dispatcher.run(active_tasks, requests, dispatcher_stop).await;
    });

    info!("transcode conductor is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("shutting down transcode conductor");
    stop.cancel();
    Ok(())
}

/// Builds the Redis URL from configuration.
fn build_redis_url(config: &RedisConfig) -> String {
    match &config.password {
        Some(pass) => format!(
            "redis://:{}@{}:{}/{}",
            pass, config.host, config.port, config.db
        ),
        None => format!("redis://{}:{}/{}", config.host, config.port, config.db),
    }
}

/// Opens the conductor database, creating the file when missing.
async fn connect_database(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Validates the configuration file and reports any issues.
async fn validate_config(config_path: &Path) -> Result<()> {
    let config = config::loader::load_and_validate(config_path)?;

    println!("Configuration is valid.");
    println!("Known storages ({}):", config.library.storages.len());
    for storage in &config.library.storages {
        println!(
            "  - {} ({})",
            storage.name,
            storage.endpoint.as_deref().unwrap_or("no endpoint")
        );
    }

    Ok(())
}

/// Displays the parsed configuration.
async fn show_config(config_path: &Path) -> Result<()> {
    let config = config::loader::load_and_validate(config_path)?;
    let yaml = serde_yaml::to_string(&config)?;
    println!("{}", yaml);
    Ok(())
}

/// Lists recent tasks in the queue.
async fn list_tasks(config_path: &Path) -> Result<()> {
    let config = config::loader::load_and_validate(config_path)?;
    let pool = connect_database(&config.database.path).await?;
    taskqueue::init_schema(&pool).await?;
    let store = TaskStore::new(pool);

    let tasks = store.list_recent(50).await?;
    if tasks.is_empty() {
        println!("Task queue is empty.");
        return Ok(());
    }

    println!("Tasks ({}):", tasks.len());
    for task in tasks {
        println!(
            "  {} - {} ({}, worker: {}, heartbeat: {})",
            task.tid,
            task.sd_hash,
            task.status,
            task.worker_id.as_deref().unwrap_or("unassigned"),
            task.last_heartbeat
        );
    }

    Ok(())
}

/// Deletes terminal tasks older than the retention window.
async fn purge_tasks(config_path: &Path, days: u32) -> Result<()> {
    let config = config::loader::load_and_validate(config_path)?;
    let pool = connect_database(&config.database.path).await?;
    taskqueue::init_schema(&pool).await?;
    let store = TaskStore::new(pool);

    let older_than = chrono::Utc::now() - chrono::TimeDelta::days(i64::from(days));
    let purged = store.purge_terminal(older_than).await?;
    println!("Purged {} task(s).", purged);

    Ok(())
}
