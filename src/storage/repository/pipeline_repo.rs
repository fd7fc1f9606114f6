use crate::storage::entity::pipeline_alert::{
    self, ActiveModel as AlertActiveModel, Entity as PipelineAlert,
};
use crate::storage::entity::pipeline_stat::{
    self, ActiveModel as StatActiveModel, Entity as PipelineStat,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;

pub const LEVEL_ERROR: &str = "error";
pub const LEVEL_CRITICAL: &str = "critical";

/// message 列和旧库保持一致，最多 255 字符
const MAX_MESSAGE_CHARS: usize = 255;

pub struct PipelineRepository;

impl PipelineRepository {
    pub async fn record_stat<C: ConnectionTrait>(
        conn: &C,
        component: &str,
        metric: &str,
        value: f64,
        detail: Option<Value>,
    ) -> Result<i32, DbErr> {
        let active_model = StatActiveModel {
            component: Set(component.to_string()),
            metric: Set(metric.to_string()),
            value: Set(value),
            detail: Set(detail.map(|d| d.to_string())),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        };
        Ok(active_model.insert(conn).await?.id)
    }

    pub async fn record_alert<C: ConnectionTrait>(
        conn: &C,
        component: &str,
        level: &str,
        message: &str,
        detail: Option<Value>,
    ) -> Result<i32, DbErr> {
        let message: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        let active_model = AlertActiveModel {
            component: Set(component.to_string()),
            level: Set(level.to_string()),
            message: Set(message),
            detail: Set(detail.map(|d| d.to_string())),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        };
        Ok(active_model.insert(conn).await?.id)
    }

    /// 某组件最近 limit 条指标，新的在前
    pub async fn fetch_recent_stats<C: ConnectionTrait>(
        conn: &C,
        component: &str,
        limit: u64,
    ) -> Result<Vec<pipeline_stat::Model>, DbErr> {
        PipelineStat::find()
            .filter(pipeline_stat::Column::Component.eq(component))
            .order_by_desc(pipeline_stat::Column::Id)
            .limit(limit)
            .all(conn)
            .await
    }

    pub async fn list_alerts<C: ConnectionTrait>(
        conn: &C,
        component: Option<&str>,
        level: Option<&str>,
        limit: u64,
    ) -> Result<Vec<pipeline_alert::Model>, DbErr> {
        let mut query = PipelineAlert::find();
        if let Some(c) = component {
            query = query.filter(pipeline_alert::Column::Component.eq(c));
        }
        if let Some(l) = level {
            query = query.filter(pipeline_alert::Column::Level.eq(l));
        }
        query
            .order_by_desc(pipeline_alert::Column::Id)
            .limit(limit)
            .all(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::test_support::temp_db;
    use serde_json::json;

    #[tokio::test]
    async fn recent_stats_are_newest_first_and_scoped_to_component() {
        let (_dir, db) = temp_db().await;
        for i in 0..4 {
            PipelineRepository::record_stat(&db, "validator", "job_success", i as f64, None)
                .await
                .unwrap();
        }
        PipelineRepository::record_stat(&db, "collector", "job_failed", 0.0, Some(json!({"job": "collector"})))
            .await
            .unwrap();

        let rows = PipelineRepository::fetch_recent_stats(&db, "validator", 3).await.unwrap();
        let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![3.0, 2.0, 1.0]);
    }

    #[tokio::test]
    async fn alert_message_is_truncated() {
        let (_dir, db) = temp_db().await;
        let long = "x".repeat(400);
        PipelineRepository::record_alert(&db, "collector", LEVEL_ERROR, &long, None)
            .await
            .unwrap();
        let alerts = PipelineRepository::list_alerts(&db, Some("collector"), None, 10)
            .await
            .unwrap();
        assert_eq!(alerts[0].message.len(), 255);
    }
}
