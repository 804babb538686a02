pub mod embedding;
pub mod generation;
pub mod scholar;
pub mod vector_db;

pub use embedding::{LocalEmbedding, RemoteEmbedding};
pub use generation::GeminiGenerator;
pub use scholar::ScholarSource;
pub use vector_db::QdrantVectorStore;
