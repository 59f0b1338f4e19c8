use crate::error::EmbedError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Vector size of the local character trigram embedder.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";
/// Vector size of `DEFAULT_MODEL_NAME`.
pub const DEFAULT_HTTP_EMBEDDING_DIMENSIONS: usize = 384;

/// Turns text into fixed-dimension dense vectors.
///
/// The model id is persisted next to the index so a query-time embedder can
/// be checked against the one that built it.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// One vector per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => Err(EmbedError::Response(
                "expected exactly one vector for a single query".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    model_id: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("char-trigram-{dimensions}"),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint, e.g. a
/// sentence-transformers server hosting `all-MiniLM-L6-v2`.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            dimensions,
            api_key: None,
            client: Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(EmbedError::Backend {
                status: status.as_u16(),
                details,
            });
        }

        let payload: EmbeddingResponse = response.json().await?;
        vectors_from_response(payload, texts.len(), self.dimensions)
    }
}

fn vectors_from_response(
    mut payload: EmbeddingResponse,
    expected_count: usize,
    expected_dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if payload.data.len() != expected_count {
        return Err(EmbedError::Response(format!(
            "requested {expected_count} embeddings, received {}",
            payload.data.len()
        )));
    }

    if payload.data.iter().all(|item| item.index.is_some()) {
        payload.data.sort_by_key(|item| item.index);
    }

    let vectors = payload
        .data
        .into_iter()
        .map(|item| item.embedding)
        .collect::<Vec<_>>();

    if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected_dimensions) {
        return Err(EmbedError::Response(format!(
            "embedding dimension {} != {}",
            bad.len(),
            expected_dimensions
        )));
    }

    Ok(vectors)
}

/// Embedder chosen at startup from configuration.
#[derive(Debug, Clone)]
pub enum EmbeddingBackend {
    CharacterNgram(CharacterNgramEmbedder),
    Http(HttpEmbedder),
}

#[async_trait]
impl Embedder for EmbeddingBackend {
    fn model_id(&self) -> &str {
        match self {
            Self::CharacterNgram(embedder) => embedder.model_id(),
            Self::Http(embedder) => embedder.model_id(),
        }
    }

    fn dimensions(&self) -> usize {
        match self {
            Self::CharacterNgram(embedder) => embedder.dimensions(),
            Self::Http(embedder) => embedder.dimensions(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self {
            Self::CharacterNgram(embedder) => embedder.embed_batch(texts).await,
            Self::Http(embedder) => embedder.embed_batch(texts).await,
        }
    }
}
