pub mod cache;
pub mod feed;
pub mod matcher;
pub mod normalizer;
pub mod persister;
pub mod pipeline;
pub mod search;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use cache::{CachedProfile, ProfileCache};
pub use matcher::{MatcherSettings, ProfileMatcher};
pub use persister::{Persister, UpsertOutcome};
pub use pipeline::IngestPipeline;
pub use store::PgStore;
