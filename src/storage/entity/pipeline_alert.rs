use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pipeline_alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub component: String,
    pub level: String, // error / critical
    pub message: String,
    #[sea_orm(nullable)]
    pub detail: Option<String>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
