pub mod rag_service;

pub use rag_service::RagServiceImpl;
