//! Job execution: a bounded worker pool with watchdog timeouts,
//! write-through progress, and cooperative cancellation.

mod manager;
mod observer;

pub use manager::{JobHandle, JobManager, JobManagerConfig};
pub use observer::StoreObserver;
