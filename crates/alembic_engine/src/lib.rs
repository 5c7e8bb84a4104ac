//! The distillation engine: provider contracts, hierarchical cluster
//! merging, and the per-iteration deduplication driver.

pub mod driver;
pub mod merger;
pub mod provider;

pub use driver::{DistillEngine, EngineConfig, EngineError, JobObserver, NoopObserver};
pub use merger::{ClusterMerger, ClusterOutcome, MergerConfig};
pub use provider::{EmbeddingProvider, MergeProvider, ProviderError};
