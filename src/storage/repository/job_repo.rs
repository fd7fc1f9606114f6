use crate::jobs::model::{JobPayload, JobStatus};
use crate::storage::entity::job::{self, ActiveModel as JobActiveModel, Entity as Job};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub finished: u64,
    pub failed: u64,
}

pub struct JobRepository;

impl JobRepository {
    pub async fn enqueue<C: ConnectionTrait>(
        conn: &C,
        payload: &JobPayload,
        priority: i32,
    ) -> Result<i32, DbErr> {
        let raw = payload
            .to_json()
            .map_err(|e| DbErr::Custom(format!("payload 序列化失败: {}", e)))?;
        Self::insert_pending(conn, payload.job_type().as_str(), raw, priority).await
    }

    async fn insert_pending<C: ConnectionTrait>(
        conn: &C,
        job_type: &str,
        payload: String,
        priority: i32,
    ) -> Result<i32, DbErr> {
        let now = Utc::now().timestamp();
        let active_model = JobActiveModel {
            job_type: Set(job_type.to_string()),
            payload: Set(payload),
            priority: Set(priority),
            status: Set(JobStatus::Pending.as_str().to_string()),
            created_at: Set(now),
            started_at: Set(None),
            finished_at: Set(None),
            result_id: Set(None),
            updated_at: Set(now),
            ..Default::default()
        };

        let result = active_model.insert(conn).await?;
        Ok(result.id)
    }

    /// 只读查询，不占用任务；真正的占用由 `claim` 的条件更新完成。
    /// 顺序：priority ASC, created_at ASC，同一秒内按自增 id 保持到达顺序。
    pub async fn claim_batch<C: ConnectionTrait>(
        conn: &C,
        limit: u64,
    ) -> Result<Vec<job::Model>, DbErr> {
        Job::find()
            .filter(job::Column::Status.eq(JobStatus::Pending.as_str()))
            .order_by_asc(job::Column::Priority)
            .order_by_asc(job::Column::CreatedAt)
            .order_by_asc(job::Column::Id)
            .limit(limit)
            .all(conn)
            .await
    }

    /// 条件更新：只有当前状态是目标状态的合法前驱时才会命中。
    /// 返回 false 表示没有行被改动（已被别的 worker 抢走，或迁移不合法）。
    pub async fn mark_status<C: ConnectionTrait>(
        conn: &C,
        id: i32,
        status: JobStatus,
        result_id: Option<i32>,
    ) -> Result<bool, DbErr> {
        let from: Vec<&str> = status.predecessors().iter().map(|s| s.as_str()).collect();
        if from.is_empty() {
            return Ok(false);
        }

        let now = Utc::now().timestamp();
        let mut update = Job::update_many()
            .col_expr(job::Column::Status, Expr::value(status.as_str()))
            .col_expr(job::Column::UpdatedAt, Expr::value(now));

        match status {
            JobStatus::Processing => {
                update = update.col_expr(job::Column::StartedAt, Expr::value(now));
            }
            JobStatus::Finished => {
                update = update
                    .col_expr(job::Column::FinishedAt, Expr::value(now))
                    .col_expr(job::Column::ResultId, Expr::value(result_id));
            }
            JobStatus::Failed => {
                update = update.col_expr(job::Column::FinishedAt, Expr::value(now));
            }
            JobStatus::Pending => {}
        }

        let res = update
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.is_in(from))
            .exec(conn)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// pending -> processing 的原子占用
    pub async fn claim<C: ConnectionTrait>(conn: &C, id: i32) -> Result<bool, DbErr> {
        Self::mark_status(conn, id, JobStatus::Processing, None).await
    }

    /// 人工重新入队：失败记录原样保留，追加一条同类型、同 payload、同优先级的新任务。
    pub async fn requeue_failed<C: ConnectionTrait>(
        conn: &C,
        id: i32,
    ) -> Result<Option<i32>, DbErr> {
        let Some(job) = Job::find_by_id(id).one(conn).await? else {
            return Ok(None);
        };
        if job.status != JobStatus::Failed.as_str() {
            return Ok(None);
        }
        let new_id = Self::insert_pending(conn, &job.job_type, job.payload, job.priority).await?;
        Ok(Some(new_id))
    }

    pub async fn find<C: ConnectionTrait>(conn: &C, id: i32) -> Result<Option<job::Model>, DbErr> {
        Job::find_by_id(id).one(conn).await
    }

    pub async fn list<C: ConnectionTrait>(
        conn: &C,
        status: Option<&str>,
        job_type: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<job::Model>, u64), DbErr> {
        let mut query = Job::find();
        if let Some(s) = status {
            query = query.filter(job::Column::Status.eq(s));
        }
        if let Some(t) = job_type {
            query = query.filter(job::Column::JobType.eq(t));
        }
        let paginator = query
            .order_by_desc(job::Column::Id)
            .paginate(conn, page_size.max(1));
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page).await?;
        Ok((rows, total))
    }

    pub async fn get_stats<C: ConnectionTrait>(conn: &C) -> Result<JobStats, DbErr> {
        let total = Job::find().count(conn).await?;
        let count_status = |status: JobStatus| {
            Job::find()
                .filter(job::Column::Status.eq(status.as_str()))
                .count(conn)
        };
        Ok(JobStats {
            total,
            pending: count_status(JobStatus::Pending).await?,
            processing: count_status(JobStatus::Processing).await?,
            finished: count_status(JobStatus::Finished).await?,
            failed: count_status(JobStatus::Failed).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::FeatureExtractPayload;
    use crate::storage::connection::test_support::temp_db;

    fn extract(period: &str) -> JobPayload {
        JobPayload::FeatureExtract(FeatureExtractPayload {
            period: period.to_string(),
        })
    }

    #[tokio::test]
    async fn claim_batch_orders_by_priority_then_arrival() {
        let (_dir, db) = temp_db().await;
        let a = JobRepository::enqueue(&db, &extract("A"), 7).await.unwrap();
        let b = JobRepository::enqueue(&db, &extract("B"), 3).await.unwrap();
        let c = JobRepository::enqueue(&db, &extract("C"), 7).await.unwrap();
        let d = JobRepository::enqueue(&db, &extract("D"), 3).await.unwrap();

        let batch = JobRepository::claim_batch(&db, 10).await.unwrap();
        let ids: Vec<i32> = batch.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![b, d, a, c]);

        for pair in batch.windows(2) {
            assert!(pair[0].priority <= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                assert!(pair[0].created_at <= pair[1].created_at);
            }
        }
    }

    #[tokio::test]
    async fn claim_batch_respects_limit_and_skips_non_pending() {
        let (_dir, db) = temp_db().await;
        let first = JobRepository::enqueue(&db, &extract("1"), 1).await.unwrap();
        JobRepository::enqueue(&db, &extract("2"), 2).await.unwrap();
        JobRepository::enqueue(&db, &extract("3"), 3).await.unwrap();
        assert!(JobRepository::claim(&db, first).await.unwrap());

        let batch = JobRepository::claim_batch(&db, 1).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].priority, 2);
    }

    #[tokio::test]
    async fn claim_succeeds_only_once() {
        let (_dir, db) = temp_db().await;
        let id = JobRepository::enqueue(&db, &extract("p"), 5).await.unwrap();
        assert!(JobRepository::claim(&db, id).await.unwrap());
        assert!(!JobRepository::claim(&db, id).await.unwrap());

        let job = JobRepository::find(&db, id).await.unwrap().unwrap();
        assert_eq!(job.status, "processing");
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_none());
    }

    #[tokio::test]
    async fn mark_status_stamps_terminal_fields() {
        let (_dir, db) = temp_db().await;
        let ok = JobRepository::enqueue(&db, &extract("ok"), 5).await.unwrap();
        let bad = JobRepository::enqueue(&db, &extract("bad"), 5).await.unwrap();

        // 未经 processing 不能直接结束
        assert!(!JobRepository::mark_status(&db, ok, JobStatus::Finished, Some(1))
            .await
            .unwrap());

        JobRepository::claim(&db, ok).await.unwrap();
        JobRepository::claim(&db, bad).await.unwrap();
        assert!(JobRepository::mark_status(&db, ok, JobStatus::Finished, Some(42))
            .await
            .unwrap());
        assert!(JobRepository::mark_status(&db, bad, JobStatus::Failed, Some(99))
            .await
            .unwrap());

        let ok = JobRepository::find(&db, ok).await.unwrap().unwrap();
        assert_eq!(ok.status, "finished");
        assert_eq!(ok.result_id, Some(42));
        assert!(ok.finished_at.is_some());

        let bad = JobRepository::find(&db, bad).await.unwrap().unwrap();
        assert_eq!(bad.status, "failed");
        assert_eq!(bad.result_id, None);
        assert!(bad.finished_at.is_some());

        // 终态之后不能再迁移
        assert!(!JobRepository::mark_status(&db, bad.id, JobStatus::Processing, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn requeue_appends_new_job_and_keeps_failed_row() {
        let (_dir, db) = temp_db().await;
        let id = JobRepository::enqueue(&db, &extract("p"), 4).await.unwrap();
        assert_eq!(JobRepository::requeue_failed(&db, id).await.unwrap(), None);

        JobRepository::claim(&db, id).await.unwrap();
        JobRepository::mark_status(&db, id, JobStatus::Failed, None)
            .await
            .unwrap();

        let new_id = JobRepository::requeue_failed(&db, id).await.unwrap().unwrap();
        assert_ne!(new_id, id);

        let old = JobRepository::find(&db, id).await.unwrap().unwrap();
        let new = JobRepository::find(&db, new_id).await.unwrap().unwrap();
        assert_eq!(old.status, "failed");
        assert_eq!(new.status, "pending");
        assert_eq!(new.payload, old.payload);
        assert_eq!(new.priority, 4);

        let stats = JobRepository::get_stats(&db).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
    }
}
