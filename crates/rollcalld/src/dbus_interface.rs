use crate::engine::{EngineError, EngineHandle, ImageSource};
use rollcall_core::attendance::AttendanceError;
use rollcall_core::{AttendanceDesk, DeskError, MarkPolicy, StoreError};
use rollcall_store::SqliteStore;
use std::sync::Arc;
use zbus::fdo;
use zbus::interface;

pub type Desk = AttendanceDesk<Arc<SqliteStore>, Arc<SqliteStore>>;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.freedesktop.Rollcall1
/// Object path: /org/freedesktop/Rollcall1
///
/// With `live` set, the face is captured from the camera and `image` is
/// ignored; otherwise `image` carries the encoded upload.
pub struct RollcallService {
    pub engine: EngineHandle,
    pub desk: Arc<Desk>,
    pub store: Arc<SqliteStore>,
    pub camera_device: String,
}

impl RollcallService {
    async fn run_desk<T, F>(&self, op: F) -> fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Desk) -> Result<T, DeskError> + Send + 'static,
    {
        let desk = Arc::clone(&self.desk);
        tokio::task::spawn_blocking(move || op(&desk))
            .await
            .map_err(|e| fdo::Error::Failed(format!("worker failed: {e}")))?
            .map_err(desk_error)
    }
}

fn check_identity(identity: &str) -> fdo::Result<String> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(fdo::Error::InvalidArgs("identity must not be empty".into()));
    }
    Ok(identity.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("failed to encode reply: {e}")))
}

pub fn engine_error(err: EngineError) -> fdo::Error {
    match err {
        EngineError::Decode(e) => fdo::Error::InvalidArgs(format!("image could not be decoded: {e}")),
        EngineError::DeviceUnavailable(msg) => fdo::Error::Failed(format!("camera unavailable: {msg}")),
        EngineError::Camera(e) => fdo::Error::IOError(format!("camera capture failed: {e}")),
        EngineError::ChannelClosed => fdo::Error::Failed("capture engine is not running".into()),
    }
}

pub fn desk_error(err: DeskError) -> fdo::Error {
    match err {
        DeskError::CorruptReference { identity, source } => fdo::Error::Failed(format!(
            "stored face reference for {identity} is corrupt ({source}); re-enroll"
        )),
        DeskError::InvalidEmbedding { identity, .. } => {
            fdo::Error::InvalidArgs(format!("could not build a face signature for {identity}"))
        }
        DeskError::Attendance(AttendanceError::StaleRead { identity }) => fdo::Error::Failed(format!(
            "attendance for {identity} was updated concurrently; try again"
        )),
        DeskError::Attendance(AttendanceError::Store(e)) | DeskError::Store(e) => store_error(e),
    }
}

fn store_error(err: StoreError) -> fdo::Error {
    match err {
        StoreError::StaleRead { identity } => fdo::Error::Failed(format!(
            "attendance for {identity} was updated concurrently; try again"
        )),
        StoreError::Backend(msg) => fdo::Error::IOError(format!("attendance database error: {msg}")),
    }
}

#[interface(name = "org.freedesktop.Rollcall1")]
impl RollcallService {
    /// Enroll (or replace) the face reference for an identity.
    async fn enroll(&self, identity: &str, live: bool, image: Vec<u8>) -> fdo::Result<bool> {
        let identity = check_identity(identity)?;
        let source = ImageSource::from_request(live, image);
        tracing::info!(identity, source = source.kind(), "enroll requested");

        let embedding = self.engine.embed(source).await.map_err(engine_error)?;
        self.run_desk(move |desk| desk.enroll(&identity, &embedding)).await?;
        Ok(true)
    }

    /// Compare a face against the identity's reference without recording attendance.
    async fn verify(&self, identity: &str, live: bool, image: Vec<u8>) -> fdo::Result<String> {
        let identity = check_identity(identity)?;
        let source = ImageSource::from_request(live, image);
        tracing::info!(identity, source = source.kind(), "verify requested");

        let embedding = self.engine.embed(source).await.map_err(engine_error)?;
        let verification = self.run_desk(move |desk| desk.verify(&identity, &embedding)).await?;
        to_json(&verification)
    }

    /// Verify, and on a match record the next TIME_IN / TIME_OUT event.
    async fn mark(&self, identity: &str, live: bool, image: Vec<u8>) -> fdo::Result<String> {
        let identity = check_identity(identity)?;
        let source = ImageSource::from_request(live, image);
        tracing::info!(identity, source = source.kind(), "mark requested");

        let embedding = self.engine.embed(source).await.map_err(engine_error)?;
        let outcome = self.run_desk(move |desk| desk.mark(&identity, &embedding)).await?;
        to_json(&outcome)
    }

    /// Most recent attendance event for the identity, or `null`.
    async fn last_event(&self, identity: &str) -> fdo::Result<String> {
        let identity = check_identity(identity)?;
        let event = self.run_desk(move |desk| desk.last_event(&identity)).await?;
        to_json(&event)
    }

    /// All attendance events for the identity, newest first.
    async fn history(&self, identity: &str) -> fdo::Result<String> {
        let identity = check_identity(identity)?;
        let events = self.run_desk(move |desk| desk.history(&identity)).await?;
        to_json(&events)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let store = Arc::clone(&self.store);
        let enrolled = tokio::task::spawn_blocking(move || store.enrolled_count())
            .await
            .map_err(|e| fdo::Error::Failed(format!("worker failed: {e}")))?
            .map_err(store_error)?;
        let policy: MarkPolicy = self.desk.machine().policy();

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.camera_device,
            "similarity_threshold": self.desk.matcher().threshold(),
            "mark_policy": policy,
            "enrolled": enrolled,
        })
        .to_string())
    }
}
