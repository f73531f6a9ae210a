//! Durable tier of the context cache

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "artifact_context_cache")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub cache_id: Uuid,

    #[sea_orm(unique)]
    pub artifact_id: Uuid,

    pub program_id: Uuid,

    /// Serialized context bundle
    #[sea_orm(column_type = "JsonBinary")]
    pub context_data: serde_json::Value,

    pub token_count: i32,

    /// Target first, then the selected related artifacts
    pub artifacts_included: Vec<Uuid>,

    pub cache_version: i32,

    pub created_at: DateTimeWithTimeZone,

    pub expires_at: DateTimeWithTimeZone,
}

impl Model {
    /// Check if the entry is past its expiry
    pub fn is_expired(&self) -> bool {
        use chrono::Utc;
        self.expires_at <= Utc::now().fixed_offset()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
