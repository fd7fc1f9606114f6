use crate::jobs::model::{JobPayload, JobType};
use crate::storage::repository::JobRepository;
use anyhow::Context;
use log::info;
use sea_orm::DatabaseConnection;

/// 手工入队：payload 先按 job_type 解码，格式不对的任务不会进队列
pub async fn run(
    db: &DatabaseConnection,
    job_type: JobType,
    raw_payload: &str,
    priority: i32,
) -> anyhow::Result<i32> {
    let payload = JobPayload::decode(job_type.as_str(), raw_payload)?;
    let id = JobRepository::enqueue(db, &payload, priority)
        .await
        .context("写入任务失败")?;
    info!("✓ 任务已入队 [ID: {}] {} (priority {})", id, job_type, priority);
    Ok(id)
}

/// 失败任务重新入队，返回新任务 id
pub async fn requeue(db: &DatabaseConnection, job_id: i32) -> anyhow::Result<i32> {
    match JobRepository::requeue_failed(db, job_id).await? {
        Some(new_id) => {
            info!("✓ 任务 [{}] 已重新入队为 [{}]", job_id, new_id);
            Ok(new_id)
        }
        None => anyhow::bail!("任务 {} 不存在或不是 failed 状态", job_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::JobStatus;
    use crate::storage::connection::test_support::temp_db;

    #[tokio::test]
    async fn rejects_malformed_payload_before_insert() {
        let (_dir, db) = temp_db().await;
        assert!(run(&db, JobType::TrendSummary, r#"{"period":"001"}"#, 1).await.is_err());
        assert_eq!(JobRepository::get_stats(&db).await.unwrap().total, 0);

        let id = run(&db, JobType::TrendSummary, r#"{"period":"001","window":5}"#, 1)
            .await
            .unwrap();
        let job = JobRepository::find(&db, id).await.unwrap().unwrap();
        assert_eq!(job.job_type, "trend_summary");
        assert_eq!(job.status, JobStatus::Pending.as_str());
    }

    #[tokio::test]
    async fn requeue_requires_failed_job() {
        let (_dir, db) = temp_db().await;
        let id = run(&db, JobType::FeatureExtract, r#"{"period":"001"}"#, 3).await.unwrap();
        assert!(requeue(&db, id).await.is_err());
        assert!(requeue(&db, 999).await.is_err());
    }
}
