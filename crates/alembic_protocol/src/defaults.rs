//! Canonical default values shared across the service.

/// Version stamped into every wire payload.
pub const SCHEMA_VERSION: u32 = 1;

/// Error string written when the watchdog expires.
pub const TIMEOUT_ERROR_MESSAGE: &str = "Job execution timed out";

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.55;
pub const DEFAULT_ITERATIONS: u32 = 4;
pub const MIN_ITERATIONS: u32 = 1;
pub const MAX_ITERATIONS: u32 = 10;

pub const DEFAULT_STORE_URL: &str = "sqlite:data/jobs.db";
pub const DEFAULT_EMBEDDING_URL: &str = "https://api.openai.com/v1/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_DISTILL_BASE_URL: &str = "https://api.blockify.ai/v1";
pub const DEFAULT_DISTILL_MODEL: &str = "distill";
