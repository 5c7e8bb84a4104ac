//! Shared types for the Alembic distillation service.
//!
//! Domain model (blocks, job lifecycle, stats), wire shapes for the HTTP
//! front door, identifier helpers, cancellation, and the settings surface.

pub mod cancel;
pub mod defaults;
pub mod ids;
pub mod settings;
pub mod types;
pub mod wire;

pub use cancel::CancelToken;
pub use ids::{BlockIdGen, JobId, SequentialBlockIds, UuidBlockIds};
pub use settings::Settings;
pub use types::{
    Block, BlockContent, BlockType, DistillResult, JobStatus, ProcessingStats, ProgressPhase,
    ResultStatus,
};
