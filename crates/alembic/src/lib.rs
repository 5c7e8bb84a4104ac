//! Alembic: asynchronous deduplication service for IdeaBlocks.
//!
//! This crate wires the engine, clients, job manager and store together
//! behind [`service::DistillService`], the contract the HTTP front door
//! calls in-process.

pub mod service;

pub use service::{DistillService, ServiceHealth, ServiceInfo, SubmitError};
