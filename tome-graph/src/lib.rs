//! The knowledge-graph and vector-link subsystem: cosine similarity over
//! stored note embeddings, LLM-validated link suggestion, and the
//! idempotent edge operations exposed to the API.

pub mod links;
pub mod ops;
pub mod vector;

pub use links::LinkSuggester;
pub use ops::{LinkEndpoint, NoteLinks, add_edge, links_of, remove_edge};
pub use vector::{LinearIndex, Scored, VectorIndex, cosine_similarity};
