use async_trait::async_trait;
use attendance_core::{BoundingBox, Embedding, FaceDetector, FaceRecognizer, Photo};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Share of near-black pixels above which a photo is rejected before inference.
const DARK_PHOTO_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] attendance_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] attendance_core::recognizer::RecognizerError),
    #[error("photo is too dark to analyse")]
    PhotoTooDark,
    #[error("no face detected in photo")]
    NoFaceDetected,
    #[error("failed to start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Face analysis as seen by the HTTP layer.
#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    /// All faces in the photo, highest confidence first.
    async fn detect(&self, photo: Photo) -> Result<Vec<BoundingBox>, EngineError>;

    /// Embedding of the most confident face in the photo.
    async fn embed(&self, photo: Photo) -> Result<Embedding, EngineError>;
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Detect {
        photo: Photo,
        reply: oneshot::Sender<Result<Vec<BoundingBox>, EngineError>>,
    },
    Embed {
        photo: Photo,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

#[async_trait]
impl FaceAnalyzer for EngineHandle {
    async fn detect(&self, photo: Photo) -> Result<Vec<BoundingBox>, EngineError> {
        self.request(|reply| EngineRequest::Detect { photo, reply }).await
    }

    async fn embed(&self, photo: Photo) -> Result<Embedding, EngineError> {
        self.request(|reply| EngineRequest::Embed { photo, reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously so a missing or broken model
/// fails startup rather than the first request.
pub fn spawn_engine(scrfd_path: &Path, arcface_path: &Path) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    let mut recognizer = FaceRecognizer::load(arcface_path)?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("attendance-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { photo, reply } => {
                        let result = run_detect(&mut detector, &photo);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Embed { photo, reply } => {
                        let result = run_embed(&mut detector, &mut recognizer, &photo);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn run_detect(detector: &mut FaceDetector, photo: &Photo) -> Result<Vec<BoundingBox>, EngineError> {
    let mut faces = detector.detect(photo)?;
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    tracing::debug!(
        width = photo.width(),
        height = photo.height(),
        faces = faces.len(),
        "detect: done"
    );
    Ok(faces)
}

/// Pick the best face (highest confidence) and extract its embedding.
fn run_embed(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    photo: &Photo,
) -> Result<Embedding, EngineError> {
    if photo.is_dark(DARK_PHOTO_THRESHOLD) {
        tracing::debug!(brightness = photo.avg_brightness(), "embed: photo too dark");
        return Err(EngineError::PhotoTooDark);
    }

    let face = best_face(detector.detect(photo)?).ok_or(EngineError::NoFaceDetected)?;
    tracing::debug!(confidence = face.confidence, "embed: best face selected");

    Ok(recognizer.extract(photo, &face)?)
}

fn best_face(faces: Vec<BoundingBox>) -> Option<BoundingBox> {
    faces
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(confidence: f32) -> BoundingBox {
        BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn test_best_face_picks_highest_confidence() {
        let best = best_face(vec![face(0.6), face(0.9), face(0.7)]).unwrap();
        assert_eq!(best.confidence, 0.9);
    }

    #[test]
    fn test_best_face_empty() {
        assert!(best_face(Vec::new()).is_none());
    }

    #[test]
    fn test_spawn_fails_fast_without_models() {
        let err = spawn_engine(
            Path::new("/nonexistent/det_10g.onnx"),
            Path::new("/nonexistent/w600k_r50.onnx"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::Detector(_)));
    }

    #[tokio::test]
    async fn test_closed_channel_reports_engine_exit() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = EngineHandle { tx };
        let photo = Photo::from_rgb(image::RgbImage::new(4, 4));
        assert!(matches!(
            handle.detect(photo).await,
            Err(EngineError::ChannelClosed)
        ));
    }
}
