//! alembicd — the Alembic distillation daemon.
//!
//! Boots logging, opens the configured job store, constructs the remote
//! clients and the service facade, then parks until interrupted. The HTTP
//! front door links [`alembic::DistillService`] in-process.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use alembic::{DistillService, ServiceInfo};
use alembic_engine::{DistillEngine, EngineConfig};
use alembic_jobs::{JobManager, JobManagerConfig};
use alembic_llm::{DistillConfig, EmbeddingConfig, HttpEmbeddingClient, HttpMergeClient};
use alembic_logging::{init_logging, LogConfig};
use alembic_protocol::defaults;
use alembic_protocol::ids::UuidBlockIds;
use alembic_protocol::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "alembicd", about = "Asynchronous IdeaBlock distillation service")]
struct Cli {
    /// Job store: sqlite:<path> or file:<dir>
    #[arg(long, env = "ALEMBIC_STORE_URL", default_value = defaults::DEFAULT_STORE_URL)]
    store_url: String,

    // Remote endpoints
    #[arg(long, env = "ALEMBIC_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: String,
    #[arg(long, env = "ALEMBIC_EMBEDDING_URL", default_value = defaults::DEFAULT_EMBEDDING_URL)]
    embedding_url: String,
    #[arg(long, env = "ALEMBIC_EMBEDDING_MODEL", default_value = defaults::DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,
    #[arg(long, env = "ALEMBIC_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: String,
    #[arg(long, env = "ALEMBIC_LLM_BASE_URL", default_value = defaults::DEFAULT_DISTILL_BASE_URL)]
    llm_base_url: String,
    #[arg(long, env = "ALEMBIC_LLM_MODEL", default_value = defaults::DEFAULT_DISTILL_MODEL)]
    llm_model: String,

    // Request defaults
    #[arg(long, env = "ALEMBIC_SIMILARITY_THRESHOLD_INITIAL", default_value_t = 0.55)]
    similarity_threshold_initial: f64,
    #[arg(long, env = "ALEMBIC_ITERATIONS_MAX", default_value_t = 4)]
    iterations_max: u32,

    // Merge sizing
    #[arg(long, env = "ALEMBIC_MAX_BLOCKS_PER_CLUSTER", default_value_t = 20)]
    max_blocks_per_cluster: usize,
    #[arg(long, env = "ALEMBIC_MAX_CLUSTER_SIZE_FOR_LLM", default_value_t = 20)]
    max_cluster_size_for_llm: usize,
    #[arg(long, env = "ALEMBIC_MAX_RECURSION_DEPTH", default_value_t = 10)]
    max_recursion_depth: usize,

    // Pool sizes
    #[arg(long, env = "ALEMBIC_LLM_PARALLEL", default_value_t = 10)]
    llm_parallel: usize,
    #[arg(long, env = "ALEMBIC_EMBEDDING_PARALLEL", default_value_t = 10)]
    embedding_parallel: usize,
    #[arg(long, env = "ALEMBIC_SIMILARITY_PARALLEL", default_value_t = 10)]
    similarity_parallel: usize,

    // LLM client
    #[arg(long, env = "ALEMBIC_LLM_MAX_RETRIES", default_value_t = 3)]
    llm_max_retries: u32,
    #[arg(long, env = "ALEMBIC_LLM_RETRY_DELAY_SECONDS", default_value_t = 2.0)]
    llm_retry_delay_seconds: f64,
    #[arg(long, env = "ALEMBIC_LLM_MAX_COMPLETION_TOKENS", default_value_t = 8192)]
    llm_max_completion_tokens: u32,
    #[arg(long, env = "ALEMBIC_LLM_REQUEST_TIMEOUT_SECONDS", default_value_t = 180)]
    llm_request_timeout_seconds: u64,

    // Similarity index
    #[arg(long, env = "ALEMBIC_USE_LSH", default_value_t = true, action = clap::ArgAction::Set)]
    use_lsh: bool,
    #[arg(long, env = "ALEMBIC_LSH_MIN_ITEMS", default_value_t = 50)]
    lsh_min_items: usize,
    #[arg(long, env = "ALEMBIC_LSH_TABLES", default_value_t = 10)]
    lsh_tables: usize,
    #[arg(long, env = "ALEMBIC_LSH_BITS", default_value_t = 8)]
    lsh_bits: usize,
    #[arg(long, env = "ALEMBIC_MAX_SIMILARITY_NEIGHBORS", default_value_t = 50)]
    max_similarity_neighbors: usize,

    // Threshold escalation
    #[arg(long, env = "ALEMBIC_SIMILARITY_INCREASE_PER_ITERATION", default_value_t = 0.01)]
    similarity_increase_per_iteration: f64,
    #[arg(long, env = "ALEMBIC_SIMILARITY_INCREASE_START_ITERATION", default_value_t = 2)]
    similarity_increase_start_iteration: u32,
    #[arg(long, env = "ALEMBIC_MAX_SIMILARITY_THRESHOLD", default_value_t = 0.98)]
    max_similarity_threshold: f64,

    // Clustering
    #[arg(long, env = "ALEMBIC_LOUVAIN_NODE_THRESHOLD", default_value_t = 1000)]
    louvain_node_threshold: usize,

    // Jobs
    #[arg(long, env = "ALEMBIC_SAVE_INTERMEDIATE", default_value_t = true, action = clap::ArgAction::Set)]
    save_intermediate: bool,
    #[arg(long, env = "ALEMBIC_JOB_TIMEOUT_SECONDS", default_value_t = 600_000)]
    job_timeout_seconds: u64,
    #[arg(long, env = "ALEMBIC_WORKER_POOL_SIZE", default_value_t = 10)]
    worker_pool_size: usize,
    #[arg(long, env = "ALEMBIC_EMBEDDING_BATCH_SIZE", default_value_t = 1000)]
    embedding_batch_size: usize,

    /// Mirror the log file to stderr at full verbosity.
    #[arg(long, short, env = "ALEMBIC_VERBOSE")]
    verbose: bool,
}

impl Cli {
    fn into_settings(self) -> Settings {
        Settings {
            embedding_api_key: self.embedding_api_key,
            embedding_url: self.embedding_url,
            embedding_model: self.embedding_model,
            llm_api_key: self.llm_api_key,
            llm_base_url: self.llm_base_url,
            llm_model: self.llm_model,
            similarity_threshold_initial: self.similarity_threshold_initial,
            iterations_max: self.iterations_max,
            max_blocks_per_cluster: self.max_blocks_per_cluster,
            max_cluster_size_for_llm: self.max_cluster_size_for_llm,
            max_recursion_depth: self.max_recursion_depth,
            llm_parallel: self.llm_parallel,
            embedding_parallel: self.embedding_parallel,
            similarity_parallel: self.similarity_parallel,
            llm_max_retries: self.llm_max_retries,
            llm_retry_delay_seconds: self.llm_retry_delay_seconds,
            llm_max_completion_tokens: self.llm_max_completion_tokens,
            llm_request_timeout_seconds: self.llm_request_timeout_seconds,
            use_lsh: self.use_lsh,
            lsh_min_items: self.lsh_min_items,
            lsh_tables: self.lsh_tables,
            lsh_bits: self.lsh_bits,
            max_similarity_neighbors: self.max_similarity_neighbors,
            similarity_increase_per_iteration: self.similarity_increase_per_iteration,
            similarity_increase_start_iteration: self.similarity_increase_start_iteration,
            max_similarity_threshold: self.max_similarity_threshold,
            louvain_node_threshold: self.louvain_node_threshold,
            save_intermediate: self.save_intermediate,
            job_timeout_seconds: self.job_timeout_seconds,
            worker_pool_size: self.worker_pool_size,
            embedding_batch_size: self.embedding_batch_size,
            store_url: self.store_url,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let _log_guard = init_logging(LogConfig {
        app_name: "alembicd",
        verbose,
    })?;

    let settings = cli.into_settings();
    if settings.embedding_api_key.is_empty() {
        anyhow::bail!("an embedding API key is required (--embedding-api-key / ALEMBIC_EMBEDDING_API_KEY)");
    }
    if settings.llm_api_key.is_empty() {
        anyhow::bail!("a distill API key is required (--llm-api-key / ALEMBIC_LLM_API_KEY)");
    }

    let store = alembic_store::open_store(&settings.store_url)
        .await
        .with_context(|| format!("failed to open job store {}", settings.store_url))?;

    let embed = Arc::new(
        HttpEmbeddingClient::new(EmbeddingConfig::from_settings(&settings))
            .context("failed to build embedding client")?,
    );
    let merge = Arc::new(
        HttpMergeClient::new(DistillConfig::from_settings(&settings))
            .context("failed to build distill client")?,
    );
    let engine = Arc::new(DistillEngine::new(
        embed,
        merge,
        Arc::new(UuidBlockIds),
        EngineConfig::from_settings(&settings),
    ));
    let manager = Arc::new(JobManager::new(
        store,
        JobManagerConfig::from_settings(&settings),
    ));
    let service = DistillService::new(engine, manager, ServiceInfo::from_settings(&settings));

    info!(
        store_url = %settings.store_url,
        embedding_model = %settings.embedding_model,
        llm_model = %settings.llm_model,
        worker_pool_size = settings.worker_pool_size,
        "alembic distillation service ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    drop(service);
    Ok(())
}
