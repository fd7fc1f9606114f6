pub mod draw_repo;
pub mod feature_repo;
pub mod job_repo;
pub mod pipeline_repo;
pub mod raw_draw_repo;
pub mod result_repo;

pub use draw_repo::{DrawDto, DrawRepository, NewDraw};
pub use feature_repo::FeatureRepository;
pub use job_repo::{JobRepository, JobStats};
pub use pipeline_repo::PipelineRepository;
pub use raw_draw_repo::{PendingRaw, RawDrawRepository};
pub use result_repo::{NewAnalysisResult, ResultRepository};
