use log::warn;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://lottery.db?mode=rwc";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerConfig {
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub max_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(2000),
            max_workers: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub collector_interval: u64,
    pub validator_interval: u64,
    pub worker_interval: u64,
    pub loop_sleep: Duration,
    pub alert_window: u64,
    pub alert_threshold: usize,
    /// 同一 component 两次 critical 告警之间的最短间隔（秒）
    pub alert_cooldown: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            collector_interval: 60,
            validator_interval: 60,
            worker_interval: 30,
            loop_sleep: Duration::from_millis(1000),
            alert_window: 5,
            alert_threshold: 3,
            alert_cooldown: 600.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub worker: WorkerConfig,
    pub scheduler: SchedulerConfig,
    pub validator_batch: u64,
    pub collector_inbox: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            validator_batch: 200,
            collector_inbox: None,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// 先加载 .env（不存在也没关系），再从环境变量覆盖默认值
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let worker = WorkerConfig {
            batch_size: parse_or(&lookup, "WORKER_BATCH_SIZE", defaults.worker.batch_size),
            poll_interval: Duration::from_millis(parse_or(&lookup, "WORKER_POLL_INTERVAL_MS", 2000u64)),
            max_workers: parse_or(&lookup, "WORKER_MAX_WORKERS", defaults.worker.max_workers),
        };
        let s = defaults.scheduler;
        let scheduler = SchedulerConfig {
            collector_interval: parse_or(&lookup, "COLLECTOR_INTERVAL", s.collector_interval),
            validator_interval: parse_or(&lookup, "VALIDATOR_INTERVAL", s.validator_interval),
            worker_interval: parse_or(&lookup, "WORKER_INTERVAL", s.worker_interval),
            loop_sleep: Duration::from_millis(parse_or(&lookup, "SCHEDULER_LOOP_SLEEP_MS", 1000u64)),
            alert_window: parse_or(&lookup, "ALERT_WINDOW", s.alert_window),
            alert_threshold: parse_or(&lookup, "ALERT_THRESHOLD", s.alert_threshold),
            alert_cooldown: parse_or(&lookup, "ALERT_COOLDOWN", s.alert_cooldown),
        };

        Self {
            database_url: non_empty(&lookup, "DATABASE_URL").unwrap_or(defaults.database_url),
            worker,
            scheduler,
            validator_batch: parse_or(&lookup, "VALIDATOR_BATCH", defaults.validator_batch),
            collector_inbox: non_empty(&lookup, "COLLECTOR_INBOX").map(PathBuf::from),
            log_dir: non_empty(&lookup, "LOG_DIR").map(PathBuf::from),
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match non_empty(lookup, key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("环境变量 {}={} 无法解析，使用默认值 {}", key, raw, default);
            default
        }),
    }
}
