use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::index::{read_index, FlatL2Index, VectorIndex};
use crate::metadata_store::load_metadata;
use crate::models::{HealthStatus, MetadataRecord, SearchHit};
use std::path::Path;
use tracing::info;

pub const DEFAULT_TOP_K: usize = 5;

/// Process-wide search state: an index and its metadata, loaded once and
/// never mutated afterwards.
pub struct QueryService<E, V = FlatL2Index> {
    embedder: E,
    index: V,
    metadata: Vec<MetadataRecord>,
}

impl<E> QueryService<E, FlatL2Index>
where
    E: Embedder,
{
    /// Loads the persisted index and metadata. Any missing file, unreadable
    /// file, or disagreement between them is fatal.
    pub fn load(embedder: E, index_path: &Path, metadata_path: &Path) -> Result<Self, SearchError> {
        let stored = read_index(index_path)?;
        if stored.model_id != embedder.model_id() {
            return Err(SearchError::ModelMismatch {
                index: stored.model_id,
                configured: embedder.model_id().to_string(),
            });
        }

        let metadata = load_metadata(metadata_path)?;
        let service = Self::new(embedder, stored.index, metadata)?;

        info!(
            index = %index_path.display(),
            metadata = %metadata_path.display(),
            documents = service.len(),
            dimensions = service.index.dimensions(),
            model = service.embedder.model_id(),
            "loaded search index"
        );
        Ok(service)
    }
}

impl<E, V> QueryService<E, V>
where
    E: Embedder,
    V: VectorIndex,
{
    pub fn new(embedder: E, index: V, metadata: Vec<MetadataRecord>) -> Result<Self, SearchError> {
        if index.dimensions() != embedder.dimensions() {
            return Err(SearchError::Inconsistent(format!(
                "index dimension {} but embedder produces {}",
                index.dimensions(),
                embedder.dimensions()
            )));
        }

        if metadata.len() != index.len() {
            return Err(SearchError::Inconsistent(format!(
                "{} metadata records for {} vectors",
                metadata.len(),
                index.len()
            )));
        }

        if let Some((position, record)) = metadata
            .iter()
            .enumerate()
            .find(|(position, record)| record.id != *position)
        {
            return Err(SearchError::Inconsistent(format!(
                "metadata row {position} has id {}",
                record.id
            )));
        }

        Ok(Self {
            embedder,
            index,
            metadata,
        })
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// The `k` nearest documents to `query`, nearest first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        if query.is_empty() {
            return Err(SearchError::InvalidQuery("query is empty".to_string()));
        }
        if k == 0 {
            return Err(SearchError::InvalidQuery("k must be at least 1".to_string()));
        }

        // Anything past the stored count would only be sentinels.
        let k = k.min(self.index.len().max(1));

        let query_vector = self.embedder.embed_one(query).await?;
        let neighbors = self.index.search(&query_vector, k)?;

        Ok(neighbors
            .into_iter()
            .filter(|neighbor| neighbor.is_match())
            .filter_map(|neighbor| {
                let record = usize::try_from(neighbor.position)
                    .ok()
                    .and_then(|position| self.metadata.get(position))?;
                Some(SearchHit {
                    score: neighbor.distance,
                    file: record.file.clone(),
                    text: record.text.clone(),
                })
            })
            .collect())
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::ok()
    }
}
