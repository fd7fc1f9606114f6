pub mod analysis;
pub mod commands;
pub mod config;
pub mod jobs;
pub mod pipeline;
pub mod shutdown;
pub mod storage;
