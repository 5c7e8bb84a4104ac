//! HTTP clients for the engine's remote collaborators: the embedding
//! endpoint and the Blockify-style distill endpoint.

pub mod distill;
pub mod embeddings;
pub mod parse;
mod retry;

pub use distill::{DistillConfig, HttpMergeClient};
pub use embeddings::{EmbeddingConfig, HttpEmbeddingClient};
pub use parse::parse_ideablocks;
