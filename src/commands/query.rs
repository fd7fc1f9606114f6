use crate::storage::repository::{
    FeatureRepository, JobRepository, PipelineRepository, ResultRepository,
};
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};

pub const PAGE_SIZE: u64 = 20;
const RECENT_ALERTS: u64 = 10;

fn page_view<T: serde::Serialize>(rows: &[T], total: u64, page: u64) -> anyhow::Result<Value> {
    Ok(json!({
        "page": page,
        "page_size": PAGE_SIZE,
        "total": total,
        "items": serde_json::to_value(rows)?,
    }))
}

pub async fn jobs(db: &DatabaseConnection, status: Option<&str>, page: u64) -> anyhow::Result<Value> {
    let (rows, total) = JobRepository::list(db, status, None, page, PAGE_SIZE).await?;
    page_view(&rows, total, page)
}

pub async fn results(
    db: &DatabaseConnection,
    analysis_type: Option<&str>,
    page: u64,
) -> anyhow::Result<Value> {
    let (rows, total) = ResultRepository::list(db, analysis_type, page, PAGE_SIZE).await?;
    page_view(&rows, total, page)
}

pub async fn features(db: &DatabaseConnection, period: Option<&str>, page: u64) -> anyhow::Result<Value> {
    let (rows, total) = FeatureRepository::list(db, period, None, page, PAGE_SIZE).await?;
    page_view(&rows, total, page)
}

/// 队列各状态计数 + 最近的告警
pub async fn stats(db: &DatabaseConnection) -> anyhow::Result<Value> {
    let jobs = JobRepository::get_stats(db).await?;
    let alerts = PipelineRepository::list_alerts(db, None, None, RECENT_ALERTS).await?;
    Ok(json!({
        "jobs": jobs,
        "recent_alerts": alerts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{FeatureExtractPayload, JobPayload};
    use crate::storage::connection::test_support::temp_db;

    #[tokio::test]
    async fn jobs_view_is_paginated() {
        let (_dir, db) = temp_db().await;
        for i in 0..25 {
            let payload = JobPayload::FeatureExtract(FeatureExtractPayload {
                period: format!("{:03}", i),
            });
            JobRepository::enqueue(&db, &payload, 3).await.unwrap();
        }
        let view = jobs(&db, Some("pending"), 1).await.unwrap();
        assert_eq!(view["total"], 25);
        assert_eq!(view["items"].as_array().unwrap().len(), 5);

        let summary = stats(&db).await.unwrap();
        assert_eq!(summary["jobs"]["pending"], 25);
        assert!(summary["recent_alerts"].as_array().unwrap().is_empty());
    }
}
