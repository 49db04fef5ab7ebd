pub mod actions;
pub mod broadcast;
#[cfg(feature = "browser")]
pub mod browser;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod panel;
pub mod queue;
pub mod registry;
pub mod store;
pub mod worker;

// Re-export the pipeline surface at crate root for convenience
pub use broadcast::{ScreenshotBroadcaster, ScreenshotFrame, ScreenshotSampler};
pub use error::{Error, Result};
pub use job::{ActionOutcome, JobRecord, JobRequest, JobState};
pub use queue::JobQueue;
pub use registry::ResourceRegistry;
pub use store::SessionStore;
pub use worker::{Worker, WorkerHandles};
