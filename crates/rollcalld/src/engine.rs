use rollcall_core::normalize::gray_from_raw;
use rollcall_core::{CascadeDetector, DecodeError, Embedding, EmbeddingExtractor, FaceLocator};
use rollcall_hw::{CameraError, CaptureDevice};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Slack on top of the device acquire timeout for warmup and frame reads.
const CAPTURE_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera error: {0}")]
    Camera(CameraError),
    #[error("image could not be decoded: {0}")]
    Decode(#[from] DecodeError),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<CameraError> for EngineError {
    fn from(err: CameraError) -> Self {
        if let CameraError::NoUsableFrame(attempts) = err {
            tracing::debug!(attempts, "camera produced no usable frame");
            Self::Decode(DecodeError::NoFrame)
        } else if err.is_unavailable() {
            Self::DeviceUnavailable(err.to_string())
        } else {
            Self::Camera(err)
        }
    }
}

/// Where a probe or enrollment image comes from.
pub enum ImageSource {
    /// Encoded image bytes supplied by the caller.
    Upload(Vec<u8>),
    /// One frame from the camera.
    Live,
}

impl ImageSource {
    /// `live` selects the camera; otherwise `bytes` is the upload, even when empty.
    pub fn from_request(live: bool, bytes: Vec<u8>) -> Self {
        if live {
            Self::Live
        } else {
            Self::Upload(bytes)
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upload(_) => "upload",
            Self::Live => "live",
        }
    }
}

/// Live capture requests sent to the engine thread.
struct CaptureRequest {
    reply: oneshot::Sender<Result<Embedding, EngineError>>,
}

/// Clone-safe handle to the engine.
///
/// Uploads are decoded on the blocking pool. Live captures go to the single
/// engine thread that owns the camera.
pub struct EngineHandle<L = CascadeDetector> {
    tx: mpsc::Sender<CaptureRequest>,
    extractor: Arc<EmbeddingExtractor<L>>,
    capture_deadline: Duration,
}

impl<L> Clone for EngineHandle<L> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            extractor: Arc::clone(&self.extractor),
            capture_deadline: self.capture_deadline,
        }
    }
}

impl<L: FaceLocator + Send + Sync + 'static> EngineHandle<L> {
    pub async fn embed(&self, source: ImageSource) -> Result<Embedding, EngineError> {
        match source {
            ImageSource::Upload(bytes) => self.embed_upload(bytes).await,
            ImageSource::Live => self.embed_live().await,
        }
    }

    async fn embed_upload(&self, bytes: Vec<u8>) -> Result<Embedding, EngineError> {
        let extractor = Arc::clone(&self.extractor);
        tokio::task::spawn_blocking(move || extractor.extract_bytes(&bytes))
            .await
            .map_err(|_| EngineError::ChannelClosed)?
            .map_err(EngineError::from)
    }

    /// Queueing behind other captures counts against the same deadline.
    async fn embed_live(&self) -> Result<Embedding, EngineError> {
        let request = async {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx
                .send(CaptureRequest { reply: reply_tx })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        };

        match tokio::time::timeout(self.capture_deadline, request).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::DeviceUnavailable(format!(
                "no frame within {:?}",
                self.capture_deadline
            ))),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The camera is not opened here; each live request acquires it, reads one
/// usable frame and releases it.
pub fn spawn_engine(
    device: CaptureDevice,
    extractor: EmbeddingExtractor<CascadeDetector>,
    capture_timeout: Duration,
) -> std::io::Result<EngineHandle> {
    let extractor = Arc::new(extractor);
    let (tx, mut rx) = mpsc::channel::<CaptureRequest>(4);

    let thread_extractor = Arc::clone(&extractor);
    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(device = device.path(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                if req.reply.is_closed() {
                    tracing::debug!("dropping capture request abandoned by caller");
                    continue;
                }
                let result = run_capture(&device, &thread_extractor);
                let _ = req.reply.send(result);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, extractor, capture_deadline: capture_timeout + CAPTURE_GRACE })
}

fn run_capture(
    device: &CaptureDevice,
    extractor: &EmbeddingExtractor<CascadeDetector>,
) -> Result<Embedding, EngineError> {
    let frame = device.capture_frame()?;
    let sequence = frame.sequence;
    let gray = gray_from_raw(frame.data, frame.width, frame.height)?;
    let embedding = extractor.extract_gray(&gray)?;
    tracing::debug!(sequence, "live frame embedded");
    Ok(embedding)
}
