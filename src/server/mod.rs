pub mod handler;

pub use handler::ScholarServerHandler;
