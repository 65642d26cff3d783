//! Sample store
//!
//! Read side of the warehouse: labeled training samples, feature rows for
//! active members and branch comparison averages. Rows come back untyped
//! (`RawSample`); the loader owns type enforcement.

mod memory;
#[cfg(feature = "sqlx")]
mod postgres;

pub use memory::InMemorySampleStore;
#[cfg(feature = "sqlx")]
pub use postgres::PgSampleStore;

use crate::error::Result;
use crate::explain::BranchStats;
use async_trait::async_trait;
use chrono::NaiveDate;
use churn_core::RawSample;

#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Samples labeled CHURN or ACTIVE with `reference_date` in `[start, end)`,
    /// ordered by `(reference_date, member_id)`
    async fn training_samples(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawSample>>;

    /// Current feature rows of active members in `branch_ids`, dated `as_of`
    async fn active_members(&self, branch_ids: &[i64], as_of: NaiveDate) -> Result<Vec<RawSample>>;

    /// All samples with `reference_date` in `[start, end)`, labeled or not
    async fn feature_snapshot(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawSample>>;

    /// Averages of the branch comparison features over ACTIVE samples of
    /// `branch_id` dated on or after `since`. Features with no data are absent.
    async fn branch_stats(&self, branch_id: i64, since: NaiveDate) -> Result<BranchStats>;

    /// Bring derived warehouse views up to date before a scoring run
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}
