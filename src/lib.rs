pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod query;
pub mod queue;
pub mod search;
pub mod tags;
pub mod utils;

// Re-export the main entry points for convenience
pub use archive::{Archive, Committed, IndexHook};
pub use config::Config;
pub use db::Store;
pub use error::{Result, TagmarkError};
pub use query::{Aggregator, QueryEngine};
pub use queue::{IndexQueue, IndexWorker};
pub use search::SearchIndex;
