use async_trait::async_trait;
use std::sync::Arc;
use tome_core::{Note, NoteId, Result};
use tome_store::Store;

/// Cosine similarity between two vectors. Returns 0.0 for mismatched
/// dimensions or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone)]
pub struct Scored {
    pub note: Note,
    pub score: f32,
}

/// Nearest-neighbour lookup over persisted notes. Pluggable so the linear
/// scan can be replaced when the corpus outgrows it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The `k` most similar notes to `embedding`, best first, excluding
    /// `exclude` and notes without an embedding.
    async fn nearest(&self, embedding: &[f32], k: usize, exclude: &NoteId)
    -> Result<Vec<Scored>>;
}

/// Brute-force cosine scan over every stored note.
pub struct LinearIndex {
    store: Arc<dyn Store>,
}

impl LinearIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VectorIndex for LinearIndex {
    async fn nearest(
        &self,
        embedding: &[f32],
        k: usize,
        exclude: &NoteId,
    ) -> Result<Vec<Scored>> {
        let mut scored: Vec<Scored> = self
            .store
            .all_notes()
            .await?
            .into_iter()
            .filter(|note| &note.id != exclude && !note.embedding.is_empty())
            .map(|note| {
                let score = cosine_similarity(embedding, &note.embedding);
                Scored { note, score }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}
