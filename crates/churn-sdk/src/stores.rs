//! PostgreSQL store pair sharing one connection pool

use crate::error::Result;
use churn_runtime::{PgPredictionStore, PgSampleStore};
use tracing::info;

pub struct PgStores {
    pub samples: PgSampleStore,
    pub predictions: PgPredictionStore,
}

impl PgStores {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let samples = PgSampleStore::connect(database_url, max_connections).await?;
        let predictions = PgPredictionStore::new(samples.pool().clone());
        info!("Connected sample and prediction stores");
        Ok(Self {
            samples,
            predictions,
        })
    }
}
