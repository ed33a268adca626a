//! hview-server — read-only inspection service for hierarchical scientific
//! container files ("H-files") stored in S3-compatible object stores.
//!
//! The service browses buckets, walks a file's internal tree, and streams
//! bounded windows into N-D datasets without ever downloading whole objects:
//! every parse and read is a sequence of HTTP Range requests.

pub mod api;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod hfile;
pub mod plan;
pub mod preview;
pub mod sanitize;
pub mod selection;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::AppError;
pub use types::AppContext;
