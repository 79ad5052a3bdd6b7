//! Gallery matching: compare a probe embedding against enrolled faces.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};

/// A persisted enrolled face with metadata.
///
/// One person may have several gallery entries: re-enrolling adds another
/// reference embedding under the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledFace {
    pub id: String,
    pub name: String,
    pub embedding: Embedding,
    pub created_at: String,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best gallery entry [-1, 1].
    pub similarity: f32,
    /// Name of the matched person (if any).
    pub name: Option<String>,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher with constant-time gallery traversal.
///
/// Always iterates ALL gallery entries; no early exit on a passing score.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            let sim = probe.similarity(&face.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                name: Some(gallery[idx].name.clone()),
            },
            _ => MatchResult {
                matched: false,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
                name: None,
            },
        }
    }
}
