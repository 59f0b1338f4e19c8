use crate::embeddings::Embedder;
use crate::error::{IndexError, IngestError};
use crate::index::{write_index, FlatL2Index, VectorIndex};
use crate::metadata_store::{load_extracted, save_metadata};
use crate::models::{BuildSummary, ExtractedDocument, MetadataRecord};
use std::path::Path;
use tracing::info;

/// Embeds every non-empty extracted document and writes a flat L2 index plus
/// the metadata rows that map index positions back to files.
///
/// Vector `i` in the index and `metadata[i]` describe the same document.
pub async fn build_index<E>(
    embedder: &E,
    extracted_path: &Path,
    index_path: &Path,
    metadata_path: &Path,
) -> Result<BuildSummary, IngestError>
where
    E: Embedder + ?Sized,
{
    let extracted = load_extracted(extracted_path)?;
    let total = extracted.len();

    let documents = extracted
        .into_iter()
        .filter(|document| !document.text.is_empty())
        .collect::<Vec<ExtractedDocument>>();
    let skipped_empty = total - documents.len();

    if documents.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no documents with text in {}",
            extracted_path.display()
        )));
    }

    info!(
        documents = documents.len(),
        skipped_empty,
        model = embedder.model_id(),
        "embedding documents"
    );

    let texts = documents
        .iter()
        .map(|document| document.text.clone())
        .collect::<Vec<_>>();
    let embeddings = embedder.embed_batch(&texts).await?;

    if embeddings.len() != documents.len() {
        return Err(IngestError::InvalidArgument(format!(
            "embedding count {} doesn't match document count {}",
            embeddings.len(),
            documents.len()
        )));
    }

    let dimensions = embeddings[0].len();
    if let Some(ragged) = embeddings.iter().find(|vector| vector.len() != dimensions) {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            actual: ragged.len(),
        }
        .into());
    }

    let mut index = FlatL2Index::new(dimensions);
    index.add(&embeddings)?;
    write_index(&index, embedder.model_id(), index_path)?;

    let metadata = documents
        .into_iter()
        .enumerate()
        .map(|(id, document)| MetadataRecord {
            id,
            file: document.file,
            text: document.text,
        })
        .collect::<Vec<_>>();
    save_metadata(&metadata, metadata_path)?;

    info!(
        index = %index_path.display(),
        metadata = %metadata_path.display(),
        vectors = index.len(),
        "saved index and metadata"
    );

    Ok(BuildSummary {
        documents: metadata.len(),
        skipped_empty,
        dimensions,
    })
}
