//! SeaORM entity models
//!
//! Rows owned by the context engine. Artifact, person and fact tables
//! belong to the ingestion pipeline and are read through raw statements.

mod context_cache_entry;
mod entity_edge;
mod temporal_sequence;

pub use context_cache_entry::{
    Entity as ContextCacheEntity,
    Model as ContextCacheRow,
    ActiveModel as ContextCacheActiveModel,
    Column as ContextCacheColumn,
};

pub use entity_edge::{
    Entity as EntityEdgeEntity,
    Model as EntityEdgeRow,
    ActiveModel as EntityEdgeActiveModel,
    Column as EntityEdgeColumn,
};

pub use temporal_sequence::{
    Entity as TemporalSequenceEntity,
    Model as TemporalSequenceRow,
    ActiveModel as TemporalSequenceActiveModel,
    Column as TemporalSequenceColumn,
};
