use anyhow::{Context, Result};
use rollcall_core::{AttendanceDesk, CascadeDetector, EmbeddingExtractor};
use rollcall_hw::CaptureDevice;
use rollcall_store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.freedesktop.Rollcall1";
const OBJECT_PATH: &str = "/org/freedesktop/Rollcall1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::load().context("failed to load configuration")?;
    let matcher = config.matcher()?;

    // Fail fast on a missing detector model or an unusable database.
    let model_path = config.detector_model.to_string_lossy();
    let detector = CascadeDetector::load(&model_path)
        .with_context(|| format!("failed to load detector model {model_path}"))?;
    tracing::info!(path = %model_path, "face detector loaded");

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("failed to open database {}", config.db_path.display()))?,
    );
    tracing::info!(path = %config.db_path.display(), "attendance database opened");

    let device = CaptureDevice::new(
        config.camera_device.clone(),
        config.capture_timeout(),
        config.warmup_frames,
    );
    let engine = engine::spawn_engine(device, EmbeddingExtractor::new(detector), config.capture_timeout())
        .context("failed to spawn engine thread")?;

    let desk = AttendanceDesk::new(Arc::clone(&store), Arc::clone(&store), matcher, config.mark_policy);
    let service = dbus_interface::RollcallService {
        engine,
        desk: Arc::new(desk),
        store,
        camera_device: config.camera_device.clone(),
    };

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(
        bus = if config.session_bus { "session" } else { "system" },
        name = BUS_NAME,
        camera = %config.camera_device,
        threshold = matcher.threshold(),
        policy = ?config.mark_policy,
        "rollcalld ready"
    );

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
