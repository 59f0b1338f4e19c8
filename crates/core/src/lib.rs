pub mod api;
pub mod builder;
pub mod cleaner;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod metadata_store;
pub mod models;
pub mod ocr;
pub mod service;

pub use api::{router, serve};
pub use builder::build_index;
pub use cleaner::{clean, clean_text};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingBackend, HttpEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_HTTP_EMBEDDING_DIMENSIONS, DEFAULT_MODEL_NAME,
};
pub use error::{EmbedError, IndexError, IngestError, SearchError, StoreError};
pub use extractor::{
    discover_documents, extract_document, extract_folder, extract_folder_best_effort,
    ExtractionReport, SkippedDocument, SUPPORTED_EXTENSIONS,
};
pub use index::{
    read_index, write_index, FlatL2Index, Neighbor, StoredIndex, VectorIndex, NO_MATCH,
};
pub use metadata_store::{load_extracted, load_metadata, save_extracted, save_metadata};
pub use models::{BuildSummary, ExtractedDocument, HealthStatus, MetadataRecord, SearchHit};
pub use ocr::{AwsCredentials, OcrEngine, SigV4Signer, TextractClient, DEFAULT_AWS_REGION};
pub use service::{QueryService, DEFAULT_TOP_K};
