use crate::storage::entity::raw_draw::{
    self, ActiveModel as RawDrawActiveModel, Entity as RawDraw,
};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value;

pub const RAW_PENDING: &str = "pending";
pub const RAW_PASSED: &str = "passed";
pub const RAW_FAILED: &str = "failed";

#[derive(Debug, Clone)]
pub struct PendingRaw {
    pub id: i32,
    pub payload: Value,
}

pub struct RawDrawRepository;

impl RawDrawRepository {
    /// 同一期重复采集时刷新 payload / source / fetched_at，状态保持不变
    pub async fn upsert_raw<C: ConnectionTrait>(
        conn: &C,
        period: &str,
        payload: &Value,
        source: &str,
    ) -> Result<(), DbErr> {
        let active_model = RawDrawActiveModel {
            period: Set(period.to_string()),
            payload: Set(payload.to_string()),
            source: Set(source.to_string()),
            fetched_at: Set(Utc::now().timestamp()),
            status: Set(RAW_PENDING.to_string()),
            ..Default::default()
        };
        RawDraw::insert(active_model)
            .on_conflict(
                OnConflict::column(raw_draw::Column::Period)
                    .update_columns([
                        raw_draw::Column::Payload,
                        raw_draw::Column::Source,
                        raw_draw::Column::FetchedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    /// 待校验记录，先采集的先处理；payload 解析失败的按空对象返回，交给校验逻辑判失败
    pub async fn load_pending<C: ConnectionTrait>(
        conn: &C,
        limit: u64,
    ) -> Result<Vec<PendingRaw>, DbErr> {
        let rows = RawDraw::find()
            .filter(raw_draw::Column::Status.eq(RAW_PENDING))
            .order_by_asc(raw_draw::Column::FetchedAt)
            .order_by_asc(raw_draw::Column::Id)
            .limit(limit)
            .all(conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| PendingRaw {
                id: r.id,
                payload: serde_json::from_str(&r.payload)
                    .unwrap_or(Value::Object(Default::default())),
            })
            .collect())
    }

    pub async fn mark<C: ConnectionTrait>(conn: &C, id: i32, status: &str) -> Result<(), DbErr> {
        RawDraw::update_many()
            .col_expr(raw_draw::Column::Status, Expr::value(status))
            .filter(raw_draw::Column::Id.eq(id))
            .exec(conn)
            .await?;
        Ok(())
    }

    pub async fn find_by_period<C: ConnectionTrait>(
        conn: &C,
        period: &str,
    ) -> Result<Option<raw_draw::Model>, DbErr> {
        RawDraw::find()
            .filter(raw_draw::Column::Period.eq(period))
            .one(conn)
            .await
    }
}
