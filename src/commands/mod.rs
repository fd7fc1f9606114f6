pub mod app_command;
pub mod enqueue;
pub mod query;

pub use app_command::{AppCommand, USAGE};

use crate::config::AppConfig;
use crate::jobs::pool::WorkerPool;
use crate::pipeline::collector::InboxCollector;
use crate::pipeline::scheduler::{default_jobs, Scheduler};
use crate::pipeline::validator::run_validation;
use crate::shutdown::Shutdown;
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 执行一条命令；常驻类命令（worker daemon / scheduler forever）在出错或收到停机信号后返回
pub async fn execute(
    cmd: AppCommand,
    db: Arc<DatabaseConnection>,
    config: &AppConfig,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    match cmd {
        AppCommand::Worker { mode } => {
            let pool = WorkerPool::new(db, config.worker);
            match pool.run(mode, shutdown).await? {
                Some(report) => print_json(&serde_json::to_value(report)?),
                None => {
                    println!("队列为空");
                    Ok(())
                }
            }
        }
        AppCommand::Scheduler {
            iterations,
            simulate_failure,
        } => {
            let mut scheduler = Scheduler::new(db.clone(), config.scheduler);
            for job in default_jobs(db, config) {
                scheduler.register(job);
            }
            scheduler.simulate_failure(simulate_failure);
            scheduler.run(iterations, shutdown).await;
            Ok(())
        }
        AppCommand::Validate => {
            let report = run_validation(db.as_ref(), config.validator_batch).await?;
            print_json(&serde_json::to_value(report)?)
        }
        AppCommand::Collect => {
            let report = InboxCollector::new(config.collector_inbox.clone())
                .collect(db.as_ref())
                .await?;
            print_json(&serde_json::to_value(report)?)
        }
        AppCommand::Enqueue {
            job_type,
            payload,
            priority,
        } => {
            let id = enqueue::run(db.as_ref(), job_type, &payload, priority).await?;
            print_json(&json!({ "job_id": id }))
        }
        AppCommand::Requeue { job_id } => {
            let new_id = enqueue::requeue(db.as_ref(), job_id).await?;
            print_json(&json!({ "job_id": job_id, "requeued_as": new_id }))
        }
        AppCommand::Jobs { status, page } => {
            print_json(&query::jobs(db.as_ref(), status.as_deref(), page).await?)
        }
        AppCommand::Results {
            analysis_type,
            page,
        } => print_json(&query::results(db.as_ref(), analysis_type.as_deref(), page).await?),
        AppCommand::Features { period, page } => {
            print_json(&query::features(db.as_ref(), period.as_deref(), page).await?)
        }
        AppCommand::Stats => print_json(&query::stats(db.as_ref()).await?),
        AppCommand::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        AppCommand::Unknown(msg) => {
            eprintln!("{}", msg);
            eprintln!("{}", USAGE);
            Ok(())
        }
    }
}
