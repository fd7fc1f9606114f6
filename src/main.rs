use chrono::Local;
use log::{error, info, warn};
use lottery_pipeline::commands::{self, AppCommand};
use lottery_pipeline::config::AppConfig;
use lottery_pipeline::{shutdown, storage};
use std::path::Path;
use std::sync::Arc;

fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Warn)
        .filter_module("lottery_pipeline", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error)
        .parse_default_env();

    if let Some(dir) = log_dir {
        let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
        std::fs::create_dir_all(dir)?;
        let log_file = std::fs::File::create(dir.join(format!("pipeline-{}.log", ts)))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    let log_dir = std::env::var("LOG_DIR").ok().filter(|v| !v.trim().is_empty());
    init_logging(log_dir.as_deref().map(Path::new))?;

    let config = AppConfig::from_env();
    let line = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let cmd: AppCommand = line.parse().unwrap_or(AppCommand::Help);

    let db = match storage::establish_connection(&config.database_url).await {
        Ok(connection) => Arc::new(connection),
        Err(e) => {
            error!("无法连接数据库 {}: {}", config.database_url, e);
            return Err(e.into());
        }
    };

    // Ctrl-C 只发停机信号，命令自己在批次/tick 之间收尾
    let (stop, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到 Ctrl-C，等待当前批次完成后退出");
            let _ = stop.send(true);
        }
    });

    let outcome = commands::execute(cmd, db.clone(), &config, shutdown).await;
    if let Err(e) = &outcome {
        error!("命令执行失败: {:#}", e);
    }

    match Arc::try_unwrap(db) {
        Ok(connection) => {
            if let Err(e) = connection.close().await {
                warn!("关闭数据库失败: {}", e);
            }
        }
        Err(_) => warn!("仍有任务持有数据库连接，跳过显式关闭"),
    }
    outcome
}
