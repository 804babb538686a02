pub mod article;
pub mod embedding;
pub mod generation;
pub mod rag;
pub mod source;
pub mod vector_store;

pub use article::Article;
pub use embedding::EmbeddingProvider;
pub use generation::{GenerationOptions, Generator, TextChunkStream};
pub use rag::{IngestReport, RagService, SummaryReport};
pub use source::ArticleSource;
pub use vector_store::{SimilarityMatch, VectorStore};
