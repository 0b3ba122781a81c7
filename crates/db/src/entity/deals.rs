//! Market deals observed on chain for tracked pieces.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "deals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub piece_cid: String,
    pub label: Option<String>,
    pub provider: String,
    pub client: String,
    pub verified: bool,
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub status: String,
    pub status_detail: Option<String>,
    pub sector_start_epoch: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
