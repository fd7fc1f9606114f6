//! 分析任务的派发表与各 handler。
//!
//! 每个 handler 对同一 (job_type, period) 幂等：特征行走 upsert，审计结果行每次追加一条，
//! 返回值是新结果行的 id，会回写到任务的 result_id。

use crate::analysis::backtest::{run_momentum_backtest, BacktestError, BacktestParams};
use crate::analysis::statistics::build_statistical_report;
use crate::jobs::model::{
    BacktestPayload, FeatureExtractPayload, JobError, JobPayload, StatisticalAnalysisPayload,
    TrendSummaryPayload,
};
use crate::storage::repository::{
    DrawRepository, FeatureRepository, NewAnalysisResult, ResultRepository,
};
use sea_orm::ConnectionTrait;
use serde::Serialize;
use serde_json::{json, Value};

pub const SCHEMA_VERSION: i32 = 1;

pub const FEATURE_BASIC_STATS: &str = "basic_stats";
pub const FEATURE_TREND_SUMMARY: &str = "trend_summary";
pub const FEATURE_STATISTICAL_REPORT: &str = "statistical_report";
pub const FEATURE_MOMENTUM_BACKTEST: &str = "momentum_backtest";

pub const ANALYSIS_BASIC_FEATURE: &str = "basic_feature";
pub const ANALYSIS_TREND_SUMMARY: &str = "trend_summary";
pub const ANALYSIS_STATISTICAL: &str = "statistical_analysis";
pub const ANALYSIS_BACKTEST: &str = "strategy_backtest";

#[derive(Debug, Clone, Serialize)]
pub struct BasicFeatures {
    pub period: String,
    pub count: usize,
    pub max: i32,
    pub min: i32,
    pub mean: f64,
    pub sum: i32,
    pub span: i32,
    pub odd_even: String,
    pub big_small: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendSummary {
    pub period: String,
    pub window: usize,
    pub latest_sum: i32,
    pub average_sum: f64,
    pub trend_delta: f64,
}

/// 固定派发表：payload 已在解码阶段按 job_type 定型，这里只做分支
pub async fn dispatch<C: ConnectionTrait>(
    conn: &C,
    job_id: i32,
    payload: &JobPayload,
) -> Result<i32, JobError> {
    match payload {
        JobPayload::FeatureExtract(p) => feature_extract(conn, job_id, p).await,
        JobPayload::TrendSummary(p) => trend_summary(conn, job_id, p).await,
        JobPayload::StatisticalAnalysis(p) => statistical_analysis(conn, job_id, p).await,
        JobPayload::StrategyBacktest(p) => strategy_backtest(conn, job_id, p).await,
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, JobError> {
    serde_json::to_value(value).map_err(|e| JobError::logic(format!("序列化结果失败: {}", e)))
}

fn meta(job_id: i32, source: &str) -> Value {
    json!({ "job_id": job_id, "source": source })
}

/// 特征 upsert + 结果追加，返回结果 id
async fn persist<C: ConnectionTrait>(
    conn: &C,
    period: &str,
    feature_type: &str,
    analysis_type: &str,
    summary: String,
    data: Value,
    meta: Value,
) -> Result<i32, JobError> {
    FeatureRepository::upsert(conn, period, feature_type, SCHEMA_VERSION, &data, &meta).await?;
    let result_id = ResultRepository::append(
        conn,
        NewAnalysisResult {
            analysis_type: analysis_type.to_string(),
            schema_version: SCHEMA_VERSION,
            summary,
            result_data: data,
            metadata: meta,
        },
    )
    .await?;
    Ok(result_id)
}

pub async fn feature_extract<C: ConnectionTrait>(
    conn: &C,
    job_id: i32,
    payload: &FeatureExtractPayload,
) -> Result<i32, JobError> {
    let period = payload.period.as_str();
    let draw = DrawRepository::find_by_period(conn, period)
        .await?
        .ok_or_else(|| JobError::validation(format!("period {} not found in draws", period)))?;

    let (Some(&max), Some(&min)) = (draw.numbers.iter().max(), draw.numbers.iter().min()) else {
        return Err(JobError::validation(format!(
            "period {} has empty numbers",
            period
        )));
    };
    let count = draw.numbers.len();
    let features = BasicFeatures {
        period: draw.period.clone(),
        count,
        max,
        min,
        mean: draw.numbers.iter().map(|&n| n as f64).sum::<f64>() / count as f64,
        sum: draw.sum,
        span: draw.span,
        odd_even: draw.odd_even.clone(),
        big_small: draw.big_small.clone(),
    };

    let summary = format!(
        "{} sum={} span={} {}/{}",
        period, features.sum, features.span, features.odd_even, features.big_small
    );
    persist(
        conn,
        period,
        FEATURE_BASIC_STATS,
        ANALYSIS_BASIC_FEATURE,
        summary,
        to_value(&features)?,
        meta(job_id, "feature_extract"),
    )
    .await
}

pub async fn trend_summary<C: ConnectionTrait>(
    conn: &C,
    job_id: i32,
    payload: &TrendSummaryPayload,
) -> Result<i32, JobError> {
    if payload.window == 0 {
        return Err(JobError::validation("trend_summary window must be >= 1"));
    }
    let period = payload.period.as_str();
    let target = DrawRepository::find_by_period(conn, period)
        .await?
        .ok_or_else(|| JobError::validation(format!("period {} not found in draws", period)))?;

    let rows = DrawRepository::load_until(conn, target.draw_time, payload.window).await?;
    if rows.is_empty() {
        return Err(JobError::logic(format!(
            "no draws found for trend window of period {}",
            period
        )));
    }

    // 同一秒可能有多期，latest_sum 只取目标期本身
    let average_sum = rows.iter().map(|d| d.sum as f64).sum::<f64>() / rows.len() as f64;
    let trend = TrendSummary {
        period: period.to_string(),
        window: rows.len(),
        latest_sum: target.sum,
        average_sum,
        trend_delta: target.sum as f64 - average_sum,
    };

    let summary = format!(
        "{} window={} avg_sum={:.2} delta={:+.2}",
        period, trend.window, trend.average_sum, trend.trend_delta
    );
    persist(
        conn,
        period,
        FEATURE_TREND_SUMMARY,
        ANALYSIS_TREND_SUMMARY,
        summary,
        to_value(&trend)?,
        meta(job_id, "trend_summary"),
    )
    .await
}

pub async fn statistical_analysis<C: ConnectionTrait>(
    conn: &C,
    job_id: i32,
    payload: &StatisticalAnalysisPayload,
) -> Result<i32, JobError> {
    if payload.window == 0 {
        return Err(JobError::validation("statistical_analysis window must be >= 1"));
    }
    let draws = DrawRepository::load_recent(conn, payload.window).await?;
    if draws.is_empty() {
        return Err(JobError::logic("no draws available for statistical analysis"));
    }

    let report = build_statistical_report(&draws, payload.window as usize);
    let summary = format!(
        "{} window={} chi2={:.3} runs={}",
        report.period, report.window, report.randomness.chi_square, report.randomness.runs
    );
    let period = report.period.clone();
    persist(
        conn,
        &period,
        FEATURE_STATISTICAL_REPORT,
        ANALYSIS_STATISTICAL,
        summary,
        to_value(&report)?,
        meta(job_id, "statistical_analysis"),
    )
    .await
}

pub async fn strategy_backtest<C: ConnectionTrait>(
    conn: &C,
    job_id: i32,
    payload: &BacktestPayload,
) -> Result<i32, JobError> {
    let params = BacktestParams {
        window: payload.window,
        short_window: payload.short_window,
        long_window: payload.long_window,
        stake: payload.stake,
        payout_multiplier: payload.payout_multiplier,
    };
    params
        .validate()
        .map_err(|e| JobError::validation(e.to_string()))?;

    // 取最近 window 期，再翻成时间升序
    let mut draws = DrawRepository::load_recent(conn, payload.window).await?;
    draws.reverse();

    let report = run_momentum_backtest(&draws, &params).map_err(|e| match e {
        BacktestError::InvalidParams(msg) => JobError::validation(msg),
        other => JobError::logic(other.to_string()),
    })?;

    let summary = format!(
        "{} trades={} win_rate={:.3} pnl={:.2}",
        report.period, report.trades, report.win_rate, report.pnl
    );
    let period = report.period.clone();
    persist(
        conn,
        &period,
        FEATURE_MOMENTUM_BACKTEST,
        ANALYSIS_BACKTEST,
        summary,
        to_value(&report)?,
        meta(job_id, "strategy_backtest"),
    )
    .await
}
