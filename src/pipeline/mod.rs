pub mod collector;
pub mod scheduler;
pub mod validator;

pub use collector::{CollectReport, InboxCollector};
pub use scheduler::{default_jobs, PipelineTask, ScheduledJob, Scheduler};
pub use validator::{run_validation, ValidationReport};
