use crate::storage::entity::analysis_result::{
    self, ActiveModel as ResultActiveModel, Entity as AnalysisResult,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde_json::Value;

/// 一次 handler 执行的审计记录，只追加不更新
#[derive(Debug, Clone)]
pub struct NewAnalysisResult {
    pub analysis_type: String,
    pub schema_version: i32,
    pub summary: String,
    pub result_data: Value,
    pub metadata: Value,
}

pub struct ResultRepository;

impl ResultRepository {
    pub async fn append<C: ConnectionTrait>(
        conn: &C,
        result: NewAnalysisResult,
    ) -> Result<i32, DbErr> {
        let active_model = ResultActiveModel {
            analysis_type: Set(result.analysis_type),
            schema_version: Set(result.schema_version),
            summary: Set(result.summary),
            result_data: Set(result.result_data.to_string()),
            metadata: Set(result.metadata.to_string()),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        };
        let inserted = active_model.insert(conn).await?;
        Ok(inserted.id)
    }

    pub async fn find<C: ConnectionTrait>(
        conn: &C,
        id: i32,
    ) -> Result<Option<analysis_result::Model>, DbErr> {
        AnalysisResult::find_by_id(id).one(conn).await
    }

    pub async fn list<C: ConnectionTrait>(
        conn: &C,
        analysis_type: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<analysis_result::Model>, u64), DbErr> {
        let mut query = AnalysisResult::find();
        if let Some(t) = analysis_type {
            query = query.filter(analysis_result::Column::AnalysisType.eq(t));
        }
        let paginator = query
            .order_by_desc(analysis_result::Column::Id)
            .paginate(conn, page_size.max(1));
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page).await?;
        Ok((rows, total))
    }
}
