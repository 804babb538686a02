pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod initialization;
pub mod retry;
pub mod server;

pub use application::RagServiceImpl;
pub use config::{load_config, AppConfig};
pub use domain::rag::{IngestReport, RagService, SummaryReport};
pub use error::{RagError, RagResult};
pub use initialization::{build_rag_service, initialize_background_services, ServiceState};
