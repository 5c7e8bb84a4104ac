//! Service settings: every recognized tuning option with its default.
//!
//! The daemon binary fills this from flags/environment; library crates carve
//! out the slices they need (engine, clients, job manager, store).

use crate::defaults;

#[derive(Debug, Clone)]
pub struct Settings {
    // Remote endpoints
    pub embedding_api_key: String,
    pub embedding_url: String,
    pub embedding_model: String,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,

    // Request defaults
    pub similarity_threshold_initial: f64,
    pub iterations_max: u32,

    // Merge sizing
    pub max_blocks_per_cluster: usize,
    pub max_cluster_size_for_llm: usize,
    pub max_recursion_depth: usize,

    // Pool sizes
    pub llm_parallel: usize,
    pub embedding_parallel: usize,
    pub similarity_parallel: usize,

    // LLM client
    pub llm_max_retries: u32,
    pub llm_retry_delay_seconds: f64,
    pub llm_max_completion_tokens: u32,
    pub llm_request_timeout_seconds: u64,

    // Similarity index
    pub use_lsh: bool,
    pub lsh_min_items: usize,
    pub lsh_tables: usize,
    pub lsh_bits: usize,
    pub max_similarity_neighbors: usize,

    // Threshold escalation
    pub similarity_increase_per_iteration: f64,
    pub similarity_increase_start_iteration: u32,
    pub max_similarity_threshold: f64,

    // Clustering
    pub louvain_node_threshold: usize,

    // Jobs
    pub save_intermediate: bool,
    pub job_timeout_seconds: u64,
    pub worker_pool_size: usize,
    pub embedding_batch_size: usize,

    // Persistence
    pub store_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_api_key: String::new(),
            embedding_url: defaults::DEFAULT_EMBEDDING_URL.to_string(),
            embedding_model: defaults::DEFAULT_EMBEDDING_MODEL.to_string(),
            llm_api_key: String::new(),
            llm_base_url: defaults::DEFAULT_DISTILL_BASE_URL.to_string(),
            llm_model: defaults::DEFAULT_DISTILL_MODEL.to_string(),

            similarity_threshold_initial: defaults::DEFAULT_SIMILARITY_THRESHOLD,
            iterations_max: defaults::DEFAULT_ITERATIONS,

            max_blocks_per_cluster: 20,
            max_cluster_size_for_llm: 20,
            max_recursion_depth: 10,

            llm_parallel: 10,
            embedding_parallel: 10,
            similarity_parallel: 10,

            llm_max_retries: 3,
            llm_retry_delay_seconds: 2.0,
            llm_max_completion_tokens: 8192,
            llm_request_timeout_seconds: 180,

            use_lsh: true,
            lsh_min_items: 50,
            lsh_tables: 10,
            lsh_bits: 8,
            max_similarity_neighbors: 50,

            similarity_increase_per_iteration: 0.01,
            similarity_increase_start_iteration: 2,
            max_similarity_threshold: 0.98,

            louvain_node_threshold: 1000,

            save_intermediate: true,
            job_timeout_seconds: 600_000,
            worker_pool_size: 10,
            embedding_batch_size: 1000,

            store_url: defaults::DEFAULT_STORE_URL.to_string(),
        }
    }
}
