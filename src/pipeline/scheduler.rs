use crate::config::{AppConfig, SchedulerConfig};
use crate::jobs::pool::{RunMode, WorkerPool};
use crate::pipeline::collector::InboxCollector;
use crate::pipeline::validator::run_validation;
use crate::shutdown::Shutdown;
use crate::storage::repository::pipeline_repo::{LEVEL_CRITICAL, LEVEL_ERROR};
use crate::storage::repository::PipelineRepository;
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

pub const METRIC_JOB_SUCCESS: &str = "job_success";
pub const METRIC_JOB_FAILED: &str = "job_failed";

#[async_trait]
pub trait PipelineTask: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

pub struct ScheduledJob {
    pub name: String,
    pub component: String,
    pub interval_seconds: u64,
    runner: Box<dyn PipelineTask>,
    next_run_ts: f64,
}

impl ScheduledJob {
    /// next_run_ts 从 0 开始，注册后的第一次 tick 就会执行
    pub fn new(
        name: impl Into<String>,
        component: impl Into<String>,
        interval_seconds: u64,
        runner: Box<dyn PipelineTask>,
    ) -> Self {
        Self {
            name: name.into(),
            component: component.into(),
            interval_seconds,
            runner,
            next_run_ts: 0.0,
        }
    }
}

pub struct CollectorTask {
    db: Arc<DatabaseConnection>,
    collector: InboxCollector,
}

#[async_trait]
impl PipelineTask for CollectorTask {
    async fn run(&self) -> anyhow::Result<()> {
        self.collector.collect(self.db.as_ref()).await?;
        Ok(())
    }
}

pub struct ValidatorTask {
    db: Arc<DatabaseConnection>,
    limit: u64,
}

#[async_trait]
impl PipelineTask for ValidatorTask {
    async fn run(&self) -> anyhow::Result<()> {
        run_validation(self.db.as_ref(), self.limit).await?;
        Ok(())
    }
}

pub struct WorkerTask {
    pool: WorkerPool,
}

#[async_trait]
impl PipelineTask for WorkerTask {
    async fn run(&self) -> anyhow::Result<()> {
        // 单批执行，停机由调度器在 tick 之间处理
        self.pool.run(RunMode::Once, Shutdown::never()).await?;
        Ok(())
    }
}

/// collector / validator / jobs_worker 三个默认任务
pub fn default_jobs(db: Arc<DatabaseConnection>, config: &AppConfig) -> Vec<ScheduledJob> {
    let s = &config.scheduler;
    vec![
        ScheduledJob::new(
            "collector",
            "collector",
            s.collector_interval,
            Box::new(CollectorTask {
                db: db.clone(),
                collector: InboxCollector::new(config.collector_inbox.clone()),
            }),
        ),
        ScheduledJob::new(
            "validator",
            "validator",
            s.validator_interval,
            Box::new(ValidatorTask {
                db: db.clone(),
                limit: config.validator_batch,
            }),
        ),
        ScheduledJob::new(
            "jobs_worker",
            "jobs_worker",
            s.worker_interval,
            Box::new(WorkerTask {
                pool: WorkerPool::new(db, config.worker),
            }),
        ),
    ]
}

fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

pub struct Scheduler {
    db: Arc<DatabaseConnection>,
    config: SchedulerConfig,
    jobs: Vec<ScheduledJob>,
    alert_tracker: HashMap<String, f64>,
    simulate_failure: HashSet<String>,
}

impl Scheduler {
    pub fn new(db: Arc<DatabaseConnection>, config: SchedulerConfig) -> Self {
        Self {
            db,
            config,
            jobs: Vec::new(),
            alert_tracker: HashMap::new(),
            simulate_failure: HashSet::new(),
        }
    }

    pub fn register(&mut self, job: ScheduledJob) {
        self.jobs.push(job);
    }

    /// 指定的任务不执行，直接按失败处理，用于演练告警
    pub fn simulate_failure(&mut self, names: impl IntoIterator<Item = String>) {
        self.simulate_failure.extend(names);
    }

    /// iterations 为 None 时一直运行，直到收到停机信号；信号只在 tick 之间生效
    pub async fn run(&mut self, iterations: Option<u64>, mut shutdown: Shutdown) {
        info!(
            "调度器启动: {} 个任务, 迭代 {}",
            self.jobs.len(),
            iterations.map_or_else(|| "不限".to_string(), |n| n.to_string())
        );
        let mut loop_count = 0u64;
        loop {
            if shutdown.is_requested() {
                info!("收到停机信号，调度器在第 {} 轮后退出", loop_count);
                break;
            }
            loop_count += 1;
            let executed = self.tick().await;
            if iterations.is_some_and(|n| loop_count >= n) {
                break;
            }
            if executed == 0 {
                shutdown.sleep(self.config.loop_sleep).await;
            }
        }
    }

    /// 执行所有到期任务，返回本轮执行的任务数
    pub async fn tick(&mut self) -> usize {
        let Self {
            db,
            config,
            jobs,
            alert_tracker,
            simulate_failure,
        } = self;
        let db: &DatabaseConnection = db;
        let now = now_ts();
        let mut executed = 0;

        for job in jobs.iter_mut() {
            if now < job.next_run_ts {
                continue;
            }
            executed += 1;
            execute_job(db, job, simulate_failure).await;
            job.next_run_ts = now + job.interval_seconds as f64;
            if let Err(e) = evaluate_alerts(db, &job.component, config, alert_tracker).await {
                error!("告警评估失败 [{}]: {}", job.component, e);
            }
        }
        executed
    }
}

async fn execute_job(db: &DatabaseConnection, job: &ScheduledJob, simulate_failure: &HashSet<String>) {
    info!("调度: 运行任务 {}", job.name);
    let started = Instant::now();
    let outcome = if simulate_failure.contains(&job.name) {
        Err(anyhow::anyhow!("simulated failure"))
    } else {
        job.runner.run().await
    };
    let duration = started.elapsed().as_secs_f64();

    let recorded = match outcome {
        Ok(()) => {
            info!("调度: 任务 {} 成功 ({:.2}s)", job.name, duration);
            PipelineRepository::record_stat(
                db,
                &job.component,
                METRIC_JOB_SUCCESS,
                duration,
                Some(json!({ "job": job.name, "duration_seconds": duration })),
            )
            .await
            .map(|_| ())
        }
        Err(e) => {
            warn!("调度: 任务 {} 失败: {:#}", job.name, e);
            record_failure(db, job, &format!("{:#}", e)).await
        }
    };
    if let Err(e) = recorded {
        error!("写入调度统计失败 [{}]: {}", job.name, e);
    }
}

async fn record_failure(db: &DatabaseConnection, job: &ScheduledJob, err: &str) -> Result<(), DbErr> {
    let detail = json!({ "job": job.name, "error": err });
    PipelineRepository::record_stat(db, &job.component, METRIC_JOB_FAILED, 0.0, Some(detail.clone()))
        .await?;
    PipelineRepository::record_alert(
        db,
        &job.component,
        LEVEL_ERROR,
        &format!("{} execution failed", job.name),
        Some(detail),
    )
    .await?;
    Ok(())
}

/// 最近 alert_window 条统计里失败数达到阈值，且距上次告警超过冷却期时，发一条 critical
async fn evaluate_alerts(
    db: &DatabaseConnection,
    component: &str,
    config: &SchedulerConfig,
    tracker: &mut HashMap<String, f64>,
) -> Result<bool, DbErr> {
    let stats = PipelineRepository::fetch_recent_stats(db, component, config.alert_window).await?;
    let failure_count = stats.iter().filter(|s| s.metric == METRIC_JOB_FAILED).count();
    if failure_count < config.alert_threshold {
        return Ok(false);
    }

    let now = now_ts();
    if let Some(last) = tracker.get(component) {
        if now - last < config.alert_cooldown {
            return Ok(false);
        }
    }

    warn!(
        "调度: {} 最近 {} 条记录中失败 {} 次",
        component, config.alert_window, failure_count
    );
    let metrics: Vec<serde_json::Value> = stats
        .iter()
        .filter_map(|s| s.detail.as_deref())
        .filter_map(|d| serde_json::from_str(d).ok())
        .collect();
    PipelineRepository::record_alert(
        db,
        component,
        LEVEL_CRITICAL,
        "repeated job failures",
        Some(json!({
            "failure_count": failure_count,
            "window": config.alert_window,
            "metrics": metrics,
        })),
    )
    .await?;
    tracker.insert(component.to_string(), now);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::test_support::temp_db;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTask(Arc<AtomicUsize>);

    #[async_trait]
    impl PipelineTask for CountingTask {
        async fn run(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingTask;

    #[async_trait]
    impl PipelineTask for FailingTask {
        async fn run(&self) -> anyhow::Result<()> {
            anyhow::bail!("upstream unavailable")
        }
    }

    /// 执行时顺带请求停机，模拟运行中收到 Ctrl-C
    struct StopRequestingTask {
        runs: Arc<AtomicUsize>,
        stop: tokio::sync::watch::Sender<bool>,
    }

    #[async_trait]
    impl PipelineTask for StopRequestingTask {
        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.stop.send(true)?;
            Ok(())
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            loop_sleep: Duration::from_millis(1),
            alert_window: 5,
            alert_threshold: 3,
            alert_cooldown: 600.0,
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test]
    async fn repeated_failures_alert_once_per_cooldown() {
        let (_dir, db) = temp_db().await;
        let db = Arc::new(db);
        let mut scheduler = Scheduler::new(db.clone(), config());
        scheduler.register(ScheduledJob::new("validator", "validator", 0, Box::new(FailingTask)));

        scheduler.run(Some(3), Shutdown::never()).await;
        let critical = PipelineRepository::list_alerts(db.as_ref(), Some("validator"), Some(LEVEL_CRITICAL), 10)
            .await
            .unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].message, "repeated job failures");

        // 第 4 次失败仍在冷却期内
        scheduler.tick().await;
        let critical = PipelineRepository::list_alerts(db.as_ref(), Some("validator"), Some(LEVEL_CRITICAL), 10)
            .await
            .unwrap();
        assert_eq!(critical.len(), 1);

        let errors = PipelineRepository::list_alerts(db.as_ref(), Some("validator"), Some(LEVEL_ERROR), 10)
            .await
            .unwrap();
        assert_eq!(errors.len(), 4);
    }

    #[tokio::test]
    async fn below_threshold_does_not_alert() {
        let (_dir, db) = temp_db().await;
        let db = Arc::new(db);
        let mut scheduler = Scheduler::new(db.clone(), config());
        scheduler.register(ScheduledJob::new("collector", "collector", 0, Box::new(FailingTask)));

        scheduler.run(Some(2), Shutdown::never()).await;
        let critical = PipelineRepository::list_alerts(db.as_ref(), None, Some(LEVEL_CRITICAL), 10)
            .await
            .unwrap();
        assert!(critical.is_empty());
    }

    #[tokio::test]
    async fn cooldown_elapsed_allows_another_alert() {
        let (_dir, db) = temp_db().await;
        let db = Arc::new(db);
        let mut scheduler = Scheduler::new(
            db.clone(),
            SchedulerConfig {
                alert_cooldown: 0.0,
                ..config()
            },
        );
        scheduler.register(ScheduledJob::new("validator", "validator", 0, Box::new(FailingTask)));

        scheduler.run(Some(4), Shutdown::never()).await;
        let critical = PipelineRepository::list_alerts(db.as_ref(), Some("validator"), Some(LEVEL_CRITICAL), 10)
            .await
            .unwrap();
        assert_eq!(critical.len(), 2);
    }

    #[tokio::test]
    async fn tasks_respect_interval_and_simulated_failure() {
        let (_dir, db) = temp_db().await;
        let db = Arc::new(db);
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(db.clone(), config());
        scheduler.register(ScheduledJob::new(
            "collector",
            "collector",
            3600,
            Box::new(CountingTask(runs.clone())),
        ));
        scheduler.register(ScheduledJob::new(
            "jobs_worker",
            "jobs_worker",
            0,
            Box::new(CountingTask(runs.clone())),
        ));
        scheduler.simulate_failure(["jobs_worker".to_string()]);

        assert_eq!(scheduler.tick().await, 2);
        assert_eq!(scheduler.tick().await, 1);
        // collector 只跑了一次，jobs_worker 被模拟失败、从未真正执行
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let collector = PipelineRepository::fetch_recent_stats(db.as_ref(), "collector", 10)
            .await
            .unwrap();
        assert_eq!(collector.len(), 1);
        assert_eq!(collector[0].metric, METRIC_JOB_SUCCESS);
        let worker = PipelineRepository::fetch_recent_stats(db.as_ref(), "jobs_worker", 10)
            .await
            .unwrap();
        assert_eq!(worker.len(), 2);
        assert!(worker.iter().all(|s| s.metric == METRIC_JOB_FAILED));
    }

    #[tokio::test]
    async fn forever_run_stops_after_the_tick_that_saw_shutdown() {
        let (_dir, db) = temp_db().await;
        let db = Arc::new(db);
        let runs = Arc::new(AtomicUsize::new(0));
        let (stop, shutdown) = crate::shutdown::channel();
        let mut scheduler = Scheduler::new(db.clone(), config());
        scheduler.register(ScheduledJob::new(
            "collector",
            "collector",
            0,
            Box::new(StopRequestingTask {
                runs: runs.clone(),
                stop,
            }),
        ));

        tokio::time::timeout(Duration::from_secs(5), scheduler.run(None, shutdown))
            .await
            .expect("scheduler ignored shutdown");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        // 收尾统计照常写入
        let stats = PipelineRepository::fetch_recent_stats(db.as_ref(), "collector", 10)
            .await
            .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].metric, METRIC_JOB_SUCCESS);
    }
}
