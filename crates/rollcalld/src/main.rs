use anyhow::{Context, Result};
use rollcall_core::EmbeddingStore;
use rollcall_io::{Config, Gallery, ManifestBackend};
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;
mod watcher;

use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use engine::{EngineError, EngineSettings};

/// Load the persisted gallery, or enroll from scratch when there is none.
fn initial_store(config: &Config) -> Result<EmbeddingStore> {
    if config.gallery_path.exists() {
        let store = Gallery::open(&config.gallery_path)?.load()?;
        if !store.is_empty() {
            tracing::info!(
                path = %config.gallery_path.display(),
                identities = store.len(),
                "gallery loaded"
            );
            return Ok(store);
        }
    }

    match engine::enroll_and_save(&config.enroll_dir, &config.gallery_path, &mut ManifestBackend) {
        Ok((store, summary)) => {
            tracing::info!(
                identities = summary.identities,
                dropped = summary.dropped.len(),
                "gallery enrolled"
            );
            Ok(store)
        }
        Err(EngineError::Enrollment(err)) => {
            // Every face will come out Unknown until an Enroll() succeeds.
            tracing::warn!(error = %err, "no gallery; starting with an empty store");
            Ok(EmbeddingStore::new())
        }
        Err(err) => Err(err.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load()?;
    let store = initial_store(&config)?;
    let engine = engine::spawn_engine(EngineSettings::from(&config), store)?;

    std::fs::create_dir_all(&config.inbox_dir)
        .with_context(|| format!("cannot create inbox {}", config.inbox_dir.display()))?;
    let _watcher = watcher::spawn_watcher(&config.inbox_dir, engine.clone())?;

    let _connection = if config.dbus_enabled {
        let connection = zbus::connection::Builder::session()?
            .name(BUS_NAME)?
            .serve_at(OBJECT_PATH, AttendanceService::new(engine.clone()))?
            .build()
            .await?;
        tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");
        Some(connection)
    } else {
        tracing::info!("D-Bus disabled via ROLLCALL_DBUS_ENABLED=0");
        None
    };

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
