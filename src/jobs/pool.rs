use crate::config::WorkerConfig;
use crate::jobs::handlers;
use crate::jobs::model::{JobError, JobPayload, JobStatus};
use crate::shutdown::Shutdown;
use crate::storage::entity::job;
use crate::storage::repository::pipeline_repo::LEVEL_ERROR;
use crate::storage::repository::{JobRepository, PipelineRepository};
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use sea_orm::{DatabaseConnection, DbErr, TransactionTrait};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const COMPONENT: &str = "worker_pool";
pub const METRIC_BATCH_SUMMARY: &str = "batch_summary";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// 最多处理一批后返回
    Once,
    /// 常驻轮询，直到收到停机信号
    Daemon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Finished,
    Failed,
    /// 条件占用没命中：别的 worker 已经拿走了
    Skipped,
    /// 存储失败，整条事务已回滚，任务回到 pending
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: i32,
    pub status: OutcomeStatus,
    pub result_id: Option<i32>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub batch_size: usize,
    pub avg_duration: f64,
    pub max_duration: f64,
    pub batch_latency: f64,
    pub parallelism: usize,
}

/// 单一聚合点：所有结果流经这里，不存在共享计数器
#[derive(Debug, Default)]
struct BatchAggregator {
    success: usize,
    failure: usize,
    skipped: usize,
    executed: usize,
    total_duration: f64,
    max_duration: f64,
}

impl BatchAggregator {
    fn push(mut self, outcome: JobOutcome) -> Self {
        let secs = outcome.duration.as_secs_f64();
        match outcome.status {
            OutcomeStatus::Finished => self.success += 1,
            OutcomeStatus::Failed => self.failure += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            // 未执行完成，不计入成功/失败
            OutcomeStatus::RolledBack => {}
        }
        if matches!(outcome.status, OutcomeStatus::Finished | OutcomeStatus::Failed) {
            self.executed += 1;
            self.total_duration += secs;
            self.max_duration = self.max_duration.max(secs);
        }
        self
    }

    fn finish(self, batch_size: usize, parallelism: usize, latency: Duration) -> BatchReport {
        BatchReport {
            success_count: self.success,
            failure_count: self.failure,
            skipped_count: self.skipped,
            batch_size,
            avg_duration: if self.executed > 0 {
                self.total_duration / self.executed as f64
            } else {
                0.0
            },
            max_duration: self.max_duration,
            batch_latency: latency.as_secs_f64(),
            parallelism,
        }
    }
}

pub struct WorkerPool {
    db: Arc<DatabaseConnection>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(db: Arc<DatabaseConnection>, config: WorkerConfig) -> Self {
        Self { db, config }
    }

    /// Daemon 模式在批次之间检查停机信号，收到后返回最后一批的报告
    pub async fn run(
        &self,
        mode: RunMode,
        mut shutdown: Shutdown,
    ) -> Result<Option<BatchReport>, DbErr> {
        let mut last = None;
        loop {
            if mode == RunMode::Daemon && shutdown.is_requested() {
                info!("收到停机信号，worker 退出");
                return Ok(last);
            }
            match self.run_once().await {
                Ok(report) => {
                    if mode == RunMode::Once {
                        return Ok(report);
                    }
                    // 有积压就立刻拉下一批；整批都回滚或被跳过也按空闲处理
                    let idle = is_idle(report.as_ref());
                    if report.is_some() {
                        last = report;
                    }
                    if idle {
                        shutdown.sleep(self.config.poll_interval).await;
                    }
                }
                Err(e) => {
                    error!("拉取任务批次失败: {}", e);
                    if mode == RunMode::Once {
                        return Err(e);
                    }
                    shutdown.sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// 拉取一批并执行；队列为空返回 None
    pub async fn run_once(&self) -> Result<Option<BatchReport>, DbErr> {
        let jobs = JobRepository::claim_batch(self.db.as_ref(), self.config.batch_size).await?;
        if jobs.is_empty() {
            return Ok(None);
        }
        let report = self.process_batch(jobs).await;

        let detail = serde_json::to_value(&report).ok();
        if let Err(e) = PipelineRepository::record_stat(
            self.db.as_ref(),
            COMPONENT,
            METRIC_BATCH_SUMMARY,
            report.success_count as f64,
            detail,
        )
        .await
        {
            warn!("写入批次统计失败: {}", e);
        }
        Ok(Some(report))
    }

    async fn process_batch(&self, jobs: Vec<job::Model>) -> BatchReport {
        let batch_size = jobs.len();
        let parallelism = if self.config.max_workers <= 1 || batch_size == 1 {
            1
        } else {
            self.config.max_workers.min(batch_size)
        };
        let started = Instant::now();

        let aggregator = if parallelism == 1 {
            let mut agg = BatchAggregator::default();
            for job in jobs {
                agg = agg.push(execute_job(self.db.as_ref(), job).await);
            }
            agg
        } else {
            // 按 claim 顺序依次派生，最多 parallelism 个同时在跑
            stream::iter(jobs)
                .map(|job| {
                    let db = self.db.clone();
                    tokio::spawn(async move { execute_job(db.as_ref(), job).await })
                })
                .buffer_unordered(parallelism)
                .fold(BatchAggregator::default(), |agg, joined| async move {
                    match joined {
                        Ok(outcome) => agg.push(outcome),
                        Err(e) => {
                            error!("任务执行线程异常退出: {}", e);
                            agg
                        }
                    }
                })
                .await
        };

        let report = aggregator.finish(batch_size, parallelism, started.elapsed());
        info!(
            "批次完成: 成功 {}, 失败 {}, 跳过 {}, 共 {} (并发 {}, 耗时 {:.3}s)",
            report.success_count,
            report.failure_count,
            report.skipped_count,
            report.batch_size,
            report.parallelism,
            report.batch_latency
        );
        report
    }
}

fn is_idle(report: Option<&BatchReport>) -> bool {
    report.map_or(true, |r| r.success_count + r.failure_count == 0)
}

/// 执行单个任务，所有错误都在这里收口，不会冒泡到 pool
pub async fn execute_job(db: &DatabaseConnection, job: job::Model) -> JobOutcome {
    let started = Instant::now();
    let job_id = job.id;
    let (status, result_id) = match run_in_transaction(db, &job).await {
        Ok(done) => done,
        Err(e) => {
            error!("任务 [{}] 存储失败，事务已回滚: {}", job_id, e);
            (OutcomeStatus::RolledBack, None)
        }
    };
    JobOutcome {
        job_id,
        status,
        result_id,
        duration: started.elapsed(),
    }
}

/// 占用 -> 执行 -> 终态 在同一个事务里；handler 跑在 savepoint 中，
/// 业务失败只回滚 savepoint，存储失败回滚整条事务。
async fn run_in_transaction(
    db: &DatabaseConnection,
    job: &job::Model,
) -> Result<(OutcomeStatus, Option<i32>), DbErr> {
    let txn = db.begin().await?;

    if !JobRepository::claim(&txn, job.id).await? {
        txn.rollback().await?;
        info!("任务 [{}] 已被其他 worker 占用，跳过", job.id);
        return Ok((OutcomeStatus::Skipped, None));
    }
    info!("▶ 开始任务 [{}] {} (priority {})", job.id, job.job_type, job.priority);

    let outcome = match JobPayload::decode(&job.job_type, &job.payload) {
        Ok(payload) => {
            let savepoint = txn.begin().await?;
            match handlers::dispatch(&savepoint, job.id, &payload).await {
                Ok(result_id) => {
                    savepoint.commit().await?;
                    Ok(result_id)
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    Err(err)
                }
            }
        }
        Err(err) => Err(err),
    };

    match outcome {
        Ok(result_id) => {
            JobRepository::mark_status(&txn, job.id, JobStatus::Finished, Some(result_id)).await?;
            txn.commit().await?;
            info!("✓ 任务完成 [{}] {} -> result {}", job.id, job.job_type, result_id);
            Ok((OutcomeStatus::Finished, Some(result_id)))
        }
        Err(err) if err.is_storage() => {
            txn.rollback().await?;
            Err(DbErr::Custom(err.message))
        }
        Err(err) => {
            warn!("✗ 任务失败 [{}] {}: {}", job.id, job.job_type, err);
            JobRepository::mark_status(&txn, job.id, JobStatus::Failed, None).await?;
            record_failure_alert(&txn, job, &err).await?;
            txn.commit().await?;
            Ok((OutcomeStatus::Failed, None))
        }
    }
}

async fn record_failure_alert<C: sea_orm::ConnectionTrait>(
    conn: &C,
    job: &job::Model,
    err: &JobError,
) -> Result<(), DbErr> {
    PipelineRepository::record_alert(
        conn,
        COMPONENT,
        LEVEL_ERROR,
        &format!("job {} ({}) failed", job.id, job.job_type),
        Some(json!({
            "job_id": job.id,
            "job_type": job.job_type,
            "kind": err.kind,
            "error": err.message,
        })),
    )
    .await?;
    Ok(())
}
