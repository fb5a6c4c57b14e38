use serde::Serialize;

use super::dataset_record::{Payload, StableKey, NAME_FIELD};

pub type Embeddings = Vec<f32>;

/// A vector and its payload, as persisted in the vector index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: StableKey,
    pub vector: Embeddings,
    pub payload: Payload,
}

/// A nearest neighbour as returned by the vector index
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub id: StableKey,
    pub score: f32,
    pub payload: Payload,
}

/// A ranked dataset entry for a query. `score` is the cosine similarity, in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub id: StableKey,
    pub score: f32,
    pub payload: Payload,
}

impl SimilarityResult {
    pub fn name(&self) -> Option<&str> {
        self.payload.get(NAME_FIELD).and_then(|value| value.as_text())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    pub dimension: usize,
}
