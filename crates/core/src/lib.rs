//! Extraction core: split papers into pages, narrow them by semantic
//! similarity, ask a language model for a named quantity on each page and
//! reconcile the answers per paper.

mod driver;
mod embedding;
mod error;
mod index;
mod page;
mod reader;
mod scanner;

pub use driver::{
    paper_identifiers, read_results, write_results, DriverOptions, ExtractionDriver,
    ExtractionResults, ExtractionSummary, PaperOutcome, DEFAULT_TOP_K,
};
pub use embedding::{
    cosine_similarity, Embedder, EmbeddingBackend, EmbeddingClient, HashEmbedder,
    HashEmbedderConfig, OpenAiEmbeddingClient, DEFAULT_EMBEDDING_MODEL,
};
pub use error::{ExtractError, Result};
pub use index::{EmbeddingIndex, ScoredPage};
pub use page::{load_pdf, pages_from_texts, Page};
pub use reader::{connect_llm, ExtractedValue, Inference, ValueReader, NOT_FOUND_SENTINEL};
pub use scanner::{PageScanner, PagesSource};
