//! Detected recurring document pattern

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "artifact_temporal_sequences")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub sequence_id: Uuid,

    pub program_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub sequence_name: String,

    /// document_type_series, weekly_series, monthly_series, quarterly_series
    #[sea_orm(column_type = "Text")]
    pub sequence_type: String,

    pub artifact_ids: Vec<Uuid>,

    pub start_date: DateTimeWithTimeZone,

    pub end_date: DateTimeWithTimeZone,

    /// category_grouping or interval_analysis
    #[sea_orm(column_type = "Text")]
    pub detection_method: String,

    #[sea_orm(column_type = "Double")]
    pub confidence_score: f64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
