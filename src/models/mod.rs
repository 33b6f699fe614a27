pub mod listing;
pub mod sent_marker;

// Re-exports for convenience
pub use listing::*;
pub use sent_marker::*;
