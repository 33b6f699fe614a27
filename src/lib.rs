pub mod browser;
pub mod config;
pub mod dispatcher;
pub mod extractor;
pub mod fetcher;
pub mod models;
pub mod notifiers;
pub mod pipeline;
pub mod storage;
pub mod utils;
pub mod workdir;

// Re-export commonly used types
pub use config::AppConfig;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
