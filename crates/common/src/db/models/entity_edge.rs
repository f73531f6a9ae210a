//! Co-occurrence edge between two people in a program

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "artifact_entity_graph")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub edge_id: Uuid,

    pub program_id: Uuid,

    /// Lower identifier of the pair
    pub person_id_1: Uuid,

    /// Higher identifier of the pair
    pub person_id_2: Uuid,

    pub co_occurrence_count: i32,

    pub shared_artifact_ids: Vec<Uuid>,

    #[sea_orm(column_type = "Double")]
    pub relationship_strength: f64,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
