use crate::storage::entity::draw::{
    self, ActiveModel as DrawActiveModel, Entity as Draw, Model as DrawModel,
};
use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};

/// 校验通过、待落库的一期开奖
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewDraw {
    pub period: String,
    pub draw_time: i64,
    pub numbers: Vec<i32>,
    pub sum: i32,
    pub span: i32,
    pub odd_even: String,
    pub big_small: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DrawDto {
    pub period: String,
    pub draw_time: i64,
    pub numbers: Vec<i32>,
    pub sum: i32,
    pub span: i32,
    pub odd_even: String,
    pub big_small: String,
}

impl From<DrawModel> for DrawDto {
    fn from(model: DrawModel) -> Self {
        Self {
            period: model.period,
            draw_time: model.draw_time,
            numbers: serde_json::from_str(&model.numbers).unwrap_or_default(),
            sum: model.sum,
            span: model.span,
            odd_even: model.odd_even,
            big_small: model.big_small,
        }
    }
}

pub struct DrawRepository;

impl DrawRepository {
    /// 开奖记录不可变：同一期已存在时什么都不做，返回 false。
    pub async fn insert_if_absent<C: ConnectionTrait>(
        conn: &C,
        draw: NewDraw,
    ) -> Result<bool, DbErr> {
        let numbers = serde_json::to_string(&draw.numbers)
            .map_err(|e| DbErr::Custom(format!("numbers 序列化失败: {}", e)))?;
        let active_model = DrawActiveModel {
            period: Set(draw.period),
            draw_time: Set(draw.draw_time),
            numbers: Set(numbers),
            sum: Set(draw.sum),
            span: Set(draw.span),
            odd_even: Set(draw.odd_even),
            big_small: Set(draw.big_small),
            created_at: Set(Utc::now().timestamp()),
        };

        let inserted = Draw::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(draw::Column::Period)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
        Ok(inserted > 0)
    }

    pub async fn find_by_period<C: ConnectionTrait>(
        conn: &C,
        period: &str,
    ) -> Result<Option<DrawDto>, DbErr> {
        Ok(Draw::find_by_id(period.to_string())
            .one(conn)
            .await?
            .map(DrawDto::from))
    }

    /// 最近 limit 期，按 draw_time 降序
    pub async fn load_recent<C: ConnectionTrait>(
        conn: &C,
        limit: u64,
    ) -> Result<Vec<DrawDto>, DbErr> {
        let models = Draw::find()
            .order_by_desc(draw::Column::DrawTime)
            .order_by_desc(draw::Column::Period)
            .limit(limit)
            .all(conn)
            .await?;
        Ok(models.into_iter().map(DrawDto::from).collect())
    }

    /// draw_time <= until 的最多 limit 期，按 draw_time 降序
    pub async fn load_until<C: ConnectionTrait>(
        conn: &C,
        until: i64,
        limit: u64,
    ) -> Result<Vec<DrawDto>, DbErr> {
        let models = Draw::find()
            .filter(draw::Column::DrawTime.lte(until))
            .order_by_desc(draw::Column::DrawTime)
            .order_by_desc(draw::Column::Period)
            .limit(limit)
            .all(conn)
            .await?;
        Ok(models.into_iter().map(DrawDto::from).collect())
    }
}
