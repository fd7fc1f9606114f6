use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FeatureExtract,
    TrendSummary,
    StatisticalAnalysis,
    StrategyBacktest,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::FeatureExtract,
        JobType::TrendSummary,
        JobType::StatisticalAnalysis,
        JobType::StrategyBacktest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FeatureExtract => "feature_extract",
            JobType::TrendSummary => "trend_summary",
            JobType::StatisticalAnalysis => "statistical_analysis",
            JobType::StrategyBacktest => "strategy_backtest",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JobError::validation(format!("unsupported job_type {}", s)))
    }
}

/// 生命周期：pending -> processing -> finished | failed，不会自动回到 pending。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    /// 允许迁入当前状态的前驱状态
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Processing => &[JobStatus::Pending],
            JobStatus::Finished | JobStatus::Failed => &[JobStatus::Processing],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::validation(format!("unknown job status {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureExtractPayload {
    pub period: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendSummaryPayload {
    pub period: String,
    pub window: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticalAnalysisPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub window: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub window: u64,
    pub short_window: usize,
    pub long_window: usize,
    pub stake: f64,
    pub payout_multiplier: f64,
}

/// 按 job_type 解码后的强类型 payload，派发表只认这四种。
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    FeatureExtract(FeatureExtractPayload),
    TrendSummary(TrendSummaryPayload),
    StatisticalAnalysis(StatisticalAnalysisPayload),
    StrategyBacktest(BacktestPayload),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::FeatureExtract(_) => JobType::FeatureExtract,
            JobPayload::TrendSummary(_) => JobType::TrendSummary,
            JobPayload::StatisticalAnalysis(_) => JobType::StatisticalAnalysis,
            JobPayload::StrategyBacktest(_) => JobType::StrategyBacktest,
        }
    }

    /// 未知类型、缺字段、字段类型不对都在这里变成 Validation 错误，不会进 handler。
    pub fn decode(job_type: &str, raw: &str) -> Result<Self, JobError> {
        let job_type: JobType = job_type.parse()?;
        let decoded = match job_type {
            JobType::FeatureExtract => serde_json::from_str(raw).map(JobPayload::FeatureExtract),
            JobType::TrendSummary => serde_json::from_str(raw).map(JobPayload::TrendSummary),
            JobType::StatisticalAnalysis => {
                serde_json::from_str(raw).map(JobPayload::StatisticalAnalysis)
            }
            JobType::StrategyBacktest => {
                serde_json::from_str(raw).map(JobPayload::StrategyBacktest)
            }
        };
        decoded.map_err(|e| JobError::validation(format!("invalid {} payload: {}", job_type, e)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            JobPayload::FeatureExtract(p) => serde_json::to_string(p),
            JobPayload::TrendSummary(p) => serde_json::to_string(p),
            JobPayload::StatisticalAnalysis(p) => serde_json::to_string(p),
            JobPayload::StrategyBacktest(p) => serde_json::to_string(p),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobErrorKind {
    Validation, // payload 缺字段 / 源数据不存在，终态失败
    Storage,    // 连接或事务失败，整条事务回滚
    Logic,      // 例如回测零成交，终态失败
}

#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Validation,
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Storage,
            message: msg.into(),
        }
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Logic,
            message: msg.into(),
        }
    }

    pub fn is_storage(&self) -> bool {
        self.kind == JobErrorKind::Storage
    }
}

impl From<sea_orm::DbErr> for JobError {
    fn from(err: sea_orm::DbErr) -> Self {
        JobError::storage(err.to_string())
    }
}
