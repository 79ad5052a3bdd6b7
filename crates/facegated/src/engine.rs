//! Inference engine thread.
//!
//! ONNX sessions take `&mut self` and inference is CPU-bound, so a dedicated
//! OS thread owns the detector and recognizer. HTTP handlers submit decoded
//! frames over an mpsc channel and await a oneshot reply; one scan runs at a
//! time and queued requests wait their turn.

use facegate_core::{BoundingBox, Embedding, FaceDetector, FaceRecognizer, Frame};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] facegate_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] facegate_core::recognizer::RecognizerError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of scanning one frame: every detected face plus the embedding of
/// the best (highest confidence) one.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub faces: Vec<BoundingBox>,
    pub embedding: Option<Embedding>,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Scan {
        frame: Frame,
        reply: oneshot::Sender<Result<ScanOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Scan a frame: detect faces and extract the best face's embedding.
    pub async fn scan(&self, frame: Frame) -> Result<ScanOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Scan {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Handle backed by a task that answers every scan with a fixed outcome.
    #[cfg(test)]
    pub fn stub(outcome: ScanOutcome) -> Self {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
        tokio::spawn(async move {
            while let Some(EngineRequest::Scan { reply, .. }) = rx.recv().await {
                let _ = reply.send(Ok(outcome.clone()));
            }
        });
        Self { tx }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously, then enters the request loop.
/// Fails fast at startup if either model is missing or unreadable.
pub fn spawn_engine(scrfd_path: &str, arcface_path: &str) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = scrfd_path, "SCRFD detector loaded");

    let mut recognizer = FaceRecognizer::load(arcface_path)?;
    tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Scan { frame, reply } => {
                        let result = run_scan(&mut detector, &mut recognizer, &frame);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Detect faces in the frame; extract an embedding for the best one.
fn run_scan(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    frame: &Frame,
) -> Result<ScanOutcome, EngineError> {
    let faces = detector.detect(frame)?;
    tracing::debug!(count = faces.len(), "scan: faces detected");

    let embedding = match faces.first() {
        Some(best) => Some(recognizer.extract(frame, best)?),
        None => None,
    };

    Ok(ScanOutcome { faces, embedding })
}
