pub mod error;
pub mod text;

pub use error::{AppError, Result};
