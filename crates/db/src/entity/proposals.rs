//! Deal offers queued for submission. Rows are created by operators; the
//! dispatcher records exactly one outcome and the tracker sets the backlink once.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "proposals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub provider: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub piece_cid: String,
    pub client: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,
    pub success_cid: Option<String>,
    pub failure_text: String,
    pub active_deal_id: Option<i64>,
    pub start_time: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
