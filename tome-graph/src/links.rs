use crate::vector::VectorIndex;
use std::sync::Arc;
use tome_core::{ModelGateway, Note, Result, SuggestedLink};

/// Top-k candidate pool offered to the LLM judge.
const MAX_CANDIDATES: usize = 5;
/// Suggestions at or below this confidence are discarded.
const MIN_CONFIDENCE: f32 = 0.5;

/// Proposes conceptual links for a freshly generated note: nearest
/// neighbours by cosine similarity, each validated by the LLM judge.
pub struct LinkSuggester {
    index: Arc<dyn VectorIndex>,
    gateway: Arc<dyn ModelGateway>,
}

impl LinkSuggester {
    pub fn new(index: Arc<dyn VectorIndex>, gateway: Arc<dyn ModelGateway>) -> Self {
        Self { index, gateway }
    }

    pub async fn suggest(&self, note: &Note) -> Result<Vec<SuggestedLink>> {
        if note.embedding.is_empty() {
            return Ok(Vec::new());
        }
        let candidates =
            self.index.nearest(&note.embedding, MAX_CANDIDATES, &note.id).await?;

        let mut suggestions = Vec::new();
        for candidate in candidates {
            let verdict =
                self.gateway.explain_link_relationship(note, &candidate.note).await?;
            if verdict.related && verdict.confidence > MIN_CONFIDENCE {
                suggestions.push(SuggestedLink {
                    target: candidate.note.id,
                    reason: verdict.reason,
                    confidence: verdict.confidence,
                });
            } else {
                tracing::debug!(
                    note = %note.id,
                    candidate = %candidate.note.id,
                    confidence = verdict.confidence,
                    "link candidate rejected"
                );
            }
        }
        Ok(suggestions)
    }
}
