use crate::jobs::model::{
    BacktestPayload, FeatureExtractPayload, JobPayload, StatisticalAnalysisPayload,
    TrendSummaryPayload,
};
use crate::storage::repository::raw_draw_repo::{RAW_FAILED, RAW_PASSED};
use crate::storage::repository::{DrawRepository, JobRepository, NewDraw, RawDrawRepository};
use chrono::NaiveDateTime;
use log::{info, warn};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const OPEN_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const BIG_THRESHOLD: i32 = 23;

/// 新开奖入库后的后续任务优先级
pub const PRIORITY_FEATURE_EXTRACT: i32 = 3;
pub const PRIORITY_TREND_SUMMARY: i32 = 6;
pub const PRIORITY_STATISTICAL: i32 = 7;
pub const PRIORITY_BACKTEST: i32 = 8;

/// 采集端可能把期号写成数字，和 collector 的 `parse_line` 保持同一套规则
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PeriodField {
    Text(String),
    Number(serde_json::Number),
}

impl PeriodField {
    fn into_string(self) -> String {
        match self {
            PeriodField::Text(s) => s,
            PeriodField::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawPayload {
    period: PeriodField,
    #[serde(rename = "openTime")]
    open_time: String,
    #[serde(rename = "openCode")]
    open_code: String,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub passed: usize,
    pub failed: usize,
    /// passed 中真正新插入的期数；重复期号不会再次派发任务
    pub inserted: usize,
}

/// 校验并转换一条原始记录。错误信息只用于日志。
pub fn validate_payload(payload: &Value) -> Result<NewDraw, String> {
    let raw: RawPayload =
        serde_json::from_value(payload.clone()).map_err(|e| format!("字段缺失或类型错误: {}", e))?;
    let period = raw.period.into_string().trim().to_string();
    if period.is_empty() {
        return Err("period 为空".to_string());
    }

    let numbers = raw
        .open_code
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<i32>() {
            Ok(n) if (0..=9).contains(&n) => Ok(n),
            _ => Err(format!("非法号码: {}", s)),
        })
        .collect::<Result<Vec<i32>, String>>()?;
    if numbers.is_empty() {
        return Err("openCode 为空".to_string());
    }

    let draw_time = match raw.timestamp {
        Some(ts) => ts,
        None => NaiveDateTime::parse_from_str(raw.open_time.trim(), OPEN_TIME_FORMAT)
            .map_err(|e| format!("openTime 格式错误 {}: {}", raw.open_time, e))?
            .and_utc()
            .timestamp(),
    };

    Ok(transform(period, draw_time, numbers))
}

fn transform(period: String, draw_time: i64, numbers: Vec<i32>) -> NewDraw {
    let sum: i32 = numbers.iter().sum();
    let max = numbers.iter().copied().max().unwrap_or(0);
    let min = numbers.iter().copied().min().unwrap_or(0);
    NewDraw {
        period,
        draw_time,
        numbers,
        sum,
        span: max - min,
        odd_even: if sum % 2 == 1 { "odd" } else { "even" }.to_string(),
        big_small: if sum >= BIG_THRESHOLD { "big" } else { "small" }.to_string(),
    }
}

pub fn follow_up_jobs(period: &str) -> Vec<(JobPayload, i32)> {
    vec![
        (
            JobPayload::FeatureExtract(FeatureExtractPayload {
                period: period.to_string(),
            }),
            PRIORITY_FEATURE_EXTRACT,
        ),
        (
            JobPayload::TrendSummary(TrendSummaryPayload {
                period: period.to_string(),
                window: 20,
            }),
            PRIORITY_TREND_SUMMARY,
        ),
        (
            JobPayload::StatisticalAnalysis(StatisticalAnalysisPayload {
                period: Some(period.to_string()),
                window: 180,
            }),
            PRIORITY_STATISTICAL,
        ),
        (
            JobPayload::StrategyBacktest(BacktestPayload {
                period: Some(period.to_string()),
                window: 360,
                short_window: 12,
                long_window: 60,
                stake: 1.0,
                payout_multiplier: 0.92,
            }),
            PRIORITY_BACKTEST,
        ),
    ]
}

async fn enqueue_follow_ups<C: ConnectionTrait>(conn: &C, period: &str) -> Result<(), DbErr> {
    for (payload, priority) in follow_up_jobs(period) {
        JobRepository::enqueue(conn, &payload, priority).await?;
    }
    Ok(())
}

/// 处理最多 limit 条待校验的原始记录，整批在一个事务里提交
pub async fn run_validation(db: &DatabaseConnection, limit: u64) -> Result<ValidationReport, DbErr> {
    let txn = db.begin().await?;
    let pending = RawDrawRepository::load_pending(&txn, limit).await?;
    let mut report = ValidationReport::default();

    for raw in pending {
        match validate_payload(&raw.payload) {
            Ok(draw) => {
                let period = draw.period.clone();
                if DrawRepository::insert_if_absent(&txn, draw).await? {
                    enqueue_follow_ups(&txn, &period).await?;
                    report.inserted += 1;
                }
                RawDrawRepository::mark(&txn, raw.id, RAW_PASSED).await?;
                report.passed += 1;
            }
            Err(reason) => {
                warn!("原始记录 [{}] 校验失败: {}", raw.id, reason);
                RawDrawRepository::mark(&txn, raw.id, RAW_FAILED).await?;
                report.failed += 1;
            }
        }
    }

    txn.commit().await?;
    if report.passed + report.failed > 0 {
        info!(
            "校验完成: 通过 {}, 失败 {}, 新入库 {}",
            report.passed, report.failed, report.inserted
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::test_support::temp_db;
    use serde_json::json;

    #[test]
    fn transforms_valid_payload() {
        let draw = validate_payload(&json!({
            "period": "20250101-001",
            "openTime": "2025-01-01 00:00:00",
            "openCode": "9,8,7,1,0",
        }))
        .unwrap();
        assert_eq!(draw.draw_time, 1_735_689_600);
        assert_eq!(draw.numbers, vec![9, 8, 7, 1, 0]);
        assert_eq!(draw.sum, 25);
        assert_eq!(draw.span, 9);
        assert_eq!(draw.odd_even, "odd");
        assert_eq!(draw.big_small, "big");
    }

    #[test]
    fn timestamp_wins_over_open_time() {
        let draw = validate_payload(&json!({
            "period": "1",
            "openTime": "not a time",
            "openCode": "1,2,3,4,5",
            "timestamp": 42,
        }))
        .unwrap();
        assert_eq!(draw.draw_time, 42);
        assert_eq!(draw.big_small, "small");
        assert_eq!(draw.odd_even, "odd");
    }

    #[test]
    fn numeric_period_is_accepted() {
        let draw = validate_payload(&json!({
            "period": 20250101001u64,
            "openTime": "2025-01-01 00:00:00",
            "openCode": "1,2,3,4,5",
        }))
        .unwrap();
        assert_eq!(draw.period, "20250101001");
        assert_eq!(draw.sum, 15);

        let err = validate_payload(&json!({
            "period": true,
            "openTime": "2025-01-01 00:00:00",
            "openCode": "1,2,3,4,5",
        }))
        .unwrap_err();
        assert!(err.contains("字段缺失或类型错误"), "{}", err);
    }

    #[test]
    fn rejects_bad_payloads() {
        for payload in [
            json!({"period": "1", "openTime": "2025-01-01 00:00:00"}),
            json!({"period": "1", "openTime": "2025-01-01 00:00:00", "openCode": "1,2,x"}),
            json!({"period": "1", "openTime": "2025-01-01 00:00:00", "openCode": "1,12,3"}),
            json!({"period": "1", "openTime": "2025-01-01 00:00:00", "openCode": ""}),
            json!({"period": "1", "openTime": "yesterday", "openCode": "1,2,3"}),
        ] {
            assert!(validate_payload(&payload).is_err(), "{}", payload);
        }
    }

    #[tokio::test]
    async fn run_validation_inserts_and_enqueues() {
        let (_dir, db) = temp_db().await;
        let good = json!({"period": "001", "openTime": "2025-01-01 00:00:00", "openCode": "1,2,3,4,5"});
        let bad = json!({"period": "002", "openTime": "2025-01-01 00:01:00", "openCode": "1,2,a"});
        RawDrawRepository::upsert_raw(&db, "001", &good, "test").await.unwrap();
        RawDrawRepository::upsert_raw(&db, "002", &bad, "test").await.unwrap();

        let report = run_validation(&db, 10).await.unwrap();
        assert_eq!(
            report,
            ValidationReport {
                passed: 1,
                failed: 1,
                inserted: 1
            }
        );
        assert!(DrawRepository::find_by_period(&db, "001").await.unwrap().is_some());
        assert!(DrawRepository::find_by_period(&db, "002").await.unwrap().is_none());
        let raw = RawDrawRepository::find_by_period(&db, "002").await.unwrap().unwrap();
        assert_eq!(raw.status, RAW_FAILED);

        let jobs = JobRepository::claim_batch(&db, 10).await.unwrap();
        let types: Vec<(&str, i32)> = jobs.iter().map(|j| (j.job_type.as_str(), j.priority)).collect();
        assert_eq!(
            types,
            vec![
                ("feature_extract", 3),
                ("trend_summary", 6),
                ("statistical_analysis", 7),
                ("strategy_backtest", 8),
            ]
        );

        // 已处理的记录不会再被校验
        assert_eq!(run_validation(&db, 10).await.unwrap(), ValidationReport::default());
    }
}
