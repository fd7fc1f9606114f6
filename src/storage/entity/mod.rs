pub mod analysis_result;
pub mod draw;
pub mod feature;
pub mod job;
pub mod pipeline_alert;
pub mod pipeline_stat;
pub mod raw_draw;

pub use analysis_result::Entity as AnalysisResult;
pub use draw::Entity as Draw;
pub use feature::Entity as Feature;
pub use job::Entity as Job;
pub use pipeline_alert::Entity as PipelineAlert;
pub use pipeline_stat::Entity as PipelineStat;
pub use raw_draw::Entity as RawDraw;
