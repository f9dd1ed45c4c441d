pub mod config;
pub mod error;
pub mod file_config;
pub mod types;

pub use config::Config;
pub use error::{
    CacheStorageError, EnrichmentLookupError, FeedFetchError, InvalidEntry, PersistenceError,
    PipelineError,
};
pub use file_config::FileConfig;
pub use types::*;
