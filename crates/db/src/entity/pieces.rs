//! Pieces eligible for dealing.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "pieces")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub piece_cid: String,
    pub root_cid: Option<String>,
    /// Root CID as claimed at piece preparation, promoted to `root_cid` once a manifest confirms it.
    pub claimed_root_cid: Option<String>,
    pub payload_size: Option<i64>,
    pub size: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
