use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// (period, feature_type) 上有唯一索引，写入一律走 upsert。
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "features")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub period: String,
    pub feature_type: String,
    pub schema_version: i32,
    pub value: String, // JSON
    pub meta: String,  // JSON
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
