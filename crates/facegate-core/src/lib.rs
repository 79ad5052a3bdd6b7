//! facegate-core — Face detection, recognition and matching engine.
//!
//! Detects faces with SCRFD and extracts ArcFace embeddings, both running
//! via ONNX Runtime for CPU inference. Input images are decoded still
//! frames (JPEG/PNG uploads) rather than a live camera stream.

pub mod alignment;
pub mod decode;
pub mod detector;
pub mod gallery;
pub mod recognizer;
pub mod types;

pub use decode::{decode_image, DecodeError, Frame};
pub use detector::FaceDetector;
pub use gallery::{CosineMatcher, EnrolledFace, MatchResult, Matcher};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Embedding};
