//! rsvp server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered under
//! `RSVP_*` environment variables, opens the SQLite store, starts the change
//! pipeline (confirmation emails, search projection, optional remote search
//! mirror), and serves the REST API over HTTP until Ctrl-C.
//!
//! # Legacy backfill
//!
//! ```
//! cargo run -p rsvp-server -- --backfill-legacy
//! ```

use std::{
  future::IntoFuture as _,
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use rsvp_core::store::RegistrationStore as _;
use rsvp_pipeline::{
  DeliveryTracker, Durability, IndexHandler, Mailer, NotifyHandler, Pipeline,
  index::{MIRROR_CONSUMER, PROJECTION_CONSUMER},
};
use rsvp_search::{RemoteIndex, SearchProjection};
use rsvp_server::{AppState, ServerConfig};
use rsvp_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::watch};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "rsvp registration server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Copy legacy registrations into the canonical table, print the report,
  /// and exit.
  #[arg(long)]
  backfill_legacy: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("RSVP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);

  // Open SQLite store.
  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?,
  );

  // Helper mode: backfill and exit.
  if cli.backfill_legacy {
    let report = store
      .backfill_legacy_registrations()
      .await
      .context("legacy backfill failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    return Ok(());
  }

  // Start the pipeline.
  let sink_timeout = server_cfg.delivery.sink_timeout();
  let tracker = Arc::new(DeliveryTracker::new());
  let projection = Arc::new(SearchProjection::new());
  let mailer = Arc::new(
    Mailer::from_config(server_cfg.mail.smtp(), server_cfg.mail.relay(), sink_timeout)
      .context("failed to build mail client")?,
  );
  if matches!(*mailer, Mailer::Log(_)) {
    tracing::warn!("no smtp host or mail relay configured, notices will only be logged");
  }

  let mut pipeline = Pipeline::new(Arc::clone(&store), server_cfg.pipeline());
  pipeline
    .spawn_consumer(
      NotifyHandler::new(Arc::clone(&store), mailer, Arc::clone(&tracker), sink_timeout),
      Durability::Persistent,
    )
    .await
    .context("failed to start notification consumer")?;
  pipeline
    .spawn_consumer(
      IndexHandler::new(PROJECTION_CONSUMER, Arc::clone(&projection)).with_tracker(Arc::clone(&tracker)),
      Durability::Ephemeral,
    )
    .await
    .context("failed to start search projection")?;
  if let Some(endpoint) = server_cfg.search.endpoint.as_deref().filter(|e| !e.is_empty()) {
    let remote = RemoteIndex::new(endpoint, sink_timeout).context("failed to build search client")?;
    pipeline
      .spawn_consumer(IndexHandler::new(MIRROR_CONSUMER, Arc::new(remote)), Durability::Persistent)
      .await
      .context("failed to start search mirror")?;
    tracing::info!(endpoint, "mirroring events to remote search");
  }

  // Build application state.
  let state = AppState {
    store:      Arc::clone(&store),
    projection: Arc::clone(&projection),
    limits:     server_cfg.search.limits(),
    health:     pipeline.health(),
    tracker:    Arc::clone(&tracker),
  };

  let app = rsvp_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  let (stop, mut stopped) = watch::channel(false);
  let server = tokio::spawn(
    axum::serve(listener, app)
      .with_graceful_shutdown(async move {
        stopped.wait_for(|stop| *stop).await.ok();
      })
      .into_future(),
  );

  tokio::select! {
    () = shutdown_signal() => tracing::info!("shutdown requested"),
    Some((consumer, result)) = pipeline.next_exit() => {
      tracing::error!(consumer = %consumer, ?result, "consumer exited unexpectedly, shutting down");
    }
  }

  // Stop accepting requests, then let in-flight deliveries finish.
  stop.send_replace(true);
  server.await.context("server task failed")?.context("server error")?;
  pipeline.shutdown().await.context("pipeline shutdown failed")?;

  Ok(())
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(error = %e, "failed to listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
