use crate::storage::entity::{
    AnalysisResult, Draw, Feature, Job, PipelineAlert, PipelineStat, RawDraw,
};
use log::info;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
    Statement,
};
use std::time::Duration;

const INDEXES: [&str; 3] = [
    // upsert 的冲突目标，缺了它 ON CONFLICT 会直接报错
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_features_period_type ON features(period, feature_type);",
    "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, priority, created_at, id);",
    "CREATE INDEX IF NOT EXISTS idx_pipeline_stats_component ON pipeline_stats(component, id);",
];

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.max_connections(10)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(60))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    // 启用 WAL 模式，读者不会被 worker 的写事务阻塞
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA journal_mode=WAL;".to_string(),
    ))
    .await?;

    create_table(&db, Draw).await?;
    create_table(&db, RawDraw).await?;
    create_table(&db, Job).await?;
    create_table(&db, Feature).await?;
    create_table(&db, AnalysisResult).await?;
    create_table(&db, PipelineStat).await?;
    create_table(&db, PipelineAlert).await?;

    for sql in INDEXES {
        db.execute(Statement::from_string(
            db.get_database_backend(),
            sql.to_string(),
        ))
        .await?;
    }

    info!("Database connection established with WAL mode and tables initialized.");

    Ok(db)
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    let stmt = builder.build(schema.create_table_from_entity(entity).if_not_exists());
    db.execute(stmt).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::establish_connection;
    use sea_orm::DatabaseConnection;
    use tempfile::TempDir;

    /// 每个测试一个独立的 SQLite 文件；TempDir 必须活得比连接久。
    pub async fn temp_db() -> (TempDir, DatabaseConnection) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("pipeline.db").display()
        );
        let db = establish_connection(&url).await.expect("connect");
        (dir, db)
    }
}
