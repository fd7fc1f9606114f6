pub mod handlers;
pub mod model;
pub mod pool;

pub use model::{JobError, JobErrorKind, JobPayload, JobStatus, JobType};
pub use pool::{BatchReport, RunMode, WorkerPool};
