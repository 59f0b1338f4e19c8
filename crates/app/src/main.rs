use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use notesearch_core::{
    build_index, extract_folder, extract_folder_best_effort, serve, CharacterNgramEmbedder,
    Embedder, EmbeddingBackend, HttpEmbedder, QueryService, TextractClient, DEFAULT_AWS_REGION,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_HTTP_EMBEDDING_DIMENSIONS, DEFAULT_MODEL_NAME,
    DEFAULT_TOP_K,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "notesearch", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    embedding: EmbeddingArgs,
}

#[derive(Args)]
struct EmbeddingArgs {
    /// OpenAI-compatible embeddings URL. Without it a local character
    /// trigram embedder is used.
    #[arg(long, env = "EMBEDDING_ENDPOINT", global = true)]
    embedding_endpoint: Option<String>,

    /// Bearer token for the embeddings endpoint.
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true, global = true)]
    embedding_api_key: Option<String>,

    /// Embedding model served by the endpoint, stored alongside the index
    /// [default: all-MiniLM-L6-v2]. Only used with `--embedding-endpoint`.
    #[arg(long, env = "SENTENCE_TRANSFORMER_MODEL", global = true)]
    model: Option<String>,

    /// Vector size produced by the embeddings endpoint.
    #[arg(
        long,
        env = "EMBEDDING_DIMENSIONS",
        default_value_t = DEFAULT_HTTP_EMBEDDING_DIMENSIONS,
        global = true
    )]
    embedding_dimensions: usize,
}

impl EmbeddingArgs {
    fn endpoint(&self) -> Option<&str> {
        self.embedding_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
    }

    /// A model that was asked for but cannot be used without an endpoint.
    fn ignored_model(&self) -> Option<&str> {
        match self.endpoint() {
            Some(_) => None,
            None => self.model.as_deref(),
        }
    }

    fn backend(&self) -> EmbeddingBackend {
        match self.endpoint() {
            Some(endpoint) => {
                let model = self.model.as_deref().unwrap_or(DEFAULT_MODEL_NAME);
                EmbeddingBackend::Http(
                    HttpEmbedder::new(endpoint, model, self.embedding_dimensions)
                        .with_api_key(self.embedding_api_key.clone()),
                )
            }
            None => {
                if let Some(model) = self.ignored_model() {
                    warn!(
                        model,
                        "no embedding endpoint configured, using the character trigram embedder"
                    );
                }
                EmbeddingBackend::CharacterNgram(CharacterNgramEmbedder::new(
                    DEFAULT_EMBEDDING_DIMENSIONS,
                ))
            }
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// OCR every image/PDF in a folder and write the extracted text as JSON.
    Extract {
        /// Input folder with images/PDFs.
        #[arg(long, default_value = "sample_data")]
        input: PathBuf,
        /// Output JSON with extracted text.
        #[arg(long, default_value = "models/extracted.json")]
        output: PathBuf,
        /// Skip files whose OCR fails instead of aborting the run.
        #[arg(long, default_value_t = false)]
        best_effort: bool,
        /// AWS region of the Textract endpoint.
        #[arg(long, env = "AWS_REGION", default_value = DEFAULT_AWS_REGION)]
        region: String,
        /// Override the Textract endpoint, e.g. for a local emulator.
        #[arg(long, env = "TEXTRACT_ENDPOINT")]
        textract_endpoint: Option<String>,
    },
    /// Embed extracted documents and write the vector index and metadata.
    Index {
        #[arg(long, default_value = "models/extracted.json")]
        extracted: PathBuf,
        #[arg(long, env = "INDEX_PATH", default_value = "models/faiss.index")]
        index: PathBuf,
        #[arg(long, env = "METADATA_PATH", default_value = "models/metadata.json")]
        meta: PathBuf,
    },
    /// Serve `GET /search` and `GET /health` over HTTP.
    Serve {
        #[arg(long, env = "INDEX_PATH", default_value = "models/faiss.index")]
        index: PathBuf,
        #[arg(long, env = "METADATA_PATH", default_value = "models/metadata.json")]
        meta: PathBuf,
        /// Address to listen on.
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
        bind: SocketAddr,
    },
    /// Run a single query against the index and print the ranked results.
    Search {
        #[arg(long)]
        query: String,
        /// Number of neighbours to return.
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        #[arg(long, env = "INDEX_PATH", default_value = "models/faiss.index")]
        index: PathBuf,
        #[arg(long, env = "METADATA_PATH", default_value = "models/metadata.json")]
        meta: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let embedder = cli.embedding.backend();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        model = embedder.model_id(),
        "notesearch boot"
    );

    match cli.command {
        Command::Extract {
            input,
            output,
            best_effort,
            region,
            textract_endpoint,
        } => {
            let textract = TextractClient::from_env(region, textract_endpoint.as_deref())?;

            if best_effort {
                let report = extract_folder_best_effort(&textract, &input, &output).await?;
                if !report.skipped.is_empty() {
                    warn!(
                        "skipped_files={} for folder={}",
                        report.skipped.len(),
                        input.display()
                    );
                    for skipped in &report.skipped {
                        warn!(
                            path = %skipped.path.display(),
                            reason = %skipped.reason,
                            "skipped document"
                        );
                    }
                }
                println!(
                    "{} documents extracted to {} ({} skipped)",
                    report.documents.len(),
                    output.display(),
                    report.skipped.len()
                );
            } else {
                let documents = extract_folder(&textract, &input, &output).await?;
                println!(
                    "{} documents extracted to {}",
                    documents.len(),
                    output.display()
                );
            }
        }
        Command::Index {
            extracted,
            index,
            meta,
        } => {
            let summary = build_index(&embedder, &extracted, &index, &meta).await?;
            println!(
                "Saved index -> {} and metadata -> {} ({} documents, {} without text, dim {})",
                index.display(),
                meta.display(),
                summary.documents,
                summary.skipped_empty,
                summary.dimensions
            );
        }
        Command::Serve { index, meta, bind } => {
            let service = QueryService::load(embedder, &index, &meta)?;
            serve(bind, Arc::new(service)).await?;
        }
        Command::Search {
            query,
            top_k,
            index,
            meta,
        } => {
            let service = QueryService::load(embedder, &index, &meta)?;
            let hits = service.search(&query, top_k).await?;

            println!("query: {query}");
            for hit in hits {
                println!("score={:.4} file={}", hit.score, hit.file);
                println!("  text: {}", hit.text);
            }
        }
    }

    Ok(())
}
