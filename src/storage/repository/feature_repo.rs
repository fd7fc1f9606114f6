use crate::storage::entity::feature::{self, ActiveModel as FeatureActiveModel, Entity as Feature};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value;

pub struct FeatureRepository;

impl FeatureRepository {
    /// (period, feature_type) 冲突时覆盖 value/meta/schema_version，后写者胜。
    pub async fn upsert<C: ConnectionTrait>(
        conn: &C,
        period: &str,
        feature_type: &str,
        schema_version: i32,
        value: &Value,
        meta: &Value,
    ) -> Result<(), DbErr> {
        let active_model = FeatureActiveModel {
            period: Set(period.to_string()),
            feature_type: Set(feature_type.to_string()),
            schema_version: Set(schema_version),
            value: Set(value.to_string()),
            meta: Set(meta.to_string()),
            updated_at: Set(Utc::now().timestamp()),
            ..Default::default()
        };

        Feature::insert(active_model)
            .on_conflict(
                OnConflict::columns([feature::Column::Period, feature::Column::FeatureType])
                    .update_columns([
                        feature::Column::SchemaVersion,
                        feature::Column::Value,
                        feature::Column::Meta,
                        feature::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    pub async fn get<C: ConnectionTrait>(
        conn: &C,
        period: &str,
        feature_type: &str,
    ) -> Result<Option<feature::Model>, DbErr> {
        Feature::find()
            .filter(feature::Column::Period.eq(period))
            .filter(feature::Column::FeatureType.eq(feature_type))
            .one(conn)
            .await
    }

    pub async fn list<C: ConnectionTrait>(
        conn: &C,
        period: Option<&str>,
        feature_type: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<feature::Model>, u64), DbErr> {
        let mut query = Feature::find();
        if let Some(p) = period {
            query = query.filter(feature::Column::Period.eq(p));
        }
        if let Some(t) = feature_type {
            query = query.filter(feature::Column::FeatureType.eq(t));
        }
        let paginator = query
            .order_by_desc(feature::Column::UpdatedAt)
            .order_by_desc(feature::Column::Id)
            .paginate(conn, page_size.max(1));
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page).await?;
        Ok((rows, total))
    }
}
