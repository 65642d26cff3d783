//! Scored predictions and their persistence

mod persistence;
#[cfg(feature = "sqlx")]
mod postgres;

pub use persistence::{
    execution_index, HistoryRecord, InMemoryPredictionStore, PlaybookExecution, PredictionStore,
    ScoredPrediction,
};
#[cfg(feature = "sqlx")]
pub use postgres::PgPredictionStore;
