//! One validated CAR file listed in a manifest.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "manifest_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub manifest_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub claimed_root_cid: String,
    pub local_path: String,
    /// Validation summary: `{valid_size, valid_header, valid_commp, size, failures?, soft_failures?}`
    #[sea_orm(column_type = "JsonBinary")]
    pub meta: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
