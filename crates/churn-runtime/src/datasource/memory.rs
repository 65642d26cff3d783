use super::SampleStore;
use crate::error::Result;
use crate::explain::{BranchStats, BRANCH_STAT_FEATURES};
use async_trait::async_trait;
use chrono::NaiveDate;
use churn_core::{LabelType, RawSample};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Sample store over in-process rows.
///
/// `samples` back the training and snapshot queries; `members` are the
/// active-member rows returned for scoring.
#[derive(Debug, Default)]
pub struct InMemorySampleStore {
    samples: RwLock<Vec<RawSample>>,
    members: RwLock<Vec<RawSample>>,
    refreshes: AtomicUsize,
}

impl InMemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(self, samples: Vec<RawSample>) -> Self {
        Self {
            samples: RwLock::new(samples),
            ..self
        }
    }

    pub fn with_members(self, members: Vec<RawSample>) -> Self {
        Self {
            members: RwLock::new(members),
            ..self
        }
    }

    pub async fn add_samples(&self, rows: impl IntoIterator<Item = RawSample>) {
        self.samples.write().await.extend(rows);
    }

    pub async fn set_members(&self, rows: Vec<RawSample>) {
        *self.members.write().await = rows;
    }

    /// Number of `refresh` calls so far
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn in_range(&self, start: NaiveDate, end: NaiveDate, labeled_only: bool) -> Vec<RawSample> {
        let mut rows: Vec<RawSample> = self
            .samples
            .read()
            .await
            .iter()
            .filter(|r| r.meta.reference_date >= start && r.meta.reference_date < end)
            .filter(|r| !labeled_only || r.meta.label_type.is_some())
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.meta.reference_date, r.meta.member_id));
        rows
    }
}

#[async_trait]
impl SampleStore for InMemorySampleStore {
    async fn training_samples(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawSample>> {
        Ok(self.in_range(start, end, true).await)
    }

    async fn active_members(&self, branch_ids: &[i64], as_of: NaiveDate) -> Result<Vec<RawSample>> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .filter(|r| branch_ids.contains(&r.meta.branch_id))
            .cloned()
            .map(|mut r| {
                r.meta.reference_date = as_of;
                r
            })
            .collect())
    }

    async fn feature_snapshot(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawSample>> {
        Ok(self.in_range(start, end, false).await)
    }

    async fn branch_stats(&self, branch_id: i64, since: NaiveDate) -> Result<BranchStats> {
        let samples = self.samples.read().await;
        let active: Vec<&RawSample> = samples
            .iter()
            .filter(|r| {
                r.meta.branch_id == branch_id
                    && r.meta.label_type == Some(LabelType::Active)
                    && r.meta.reference_date >= since
            })
            .collect();

        let mut stats = BranchStats::new();
        for feature in BRANCH_STAT_FEATURES {
            let values: Vec<f64> = active
                .iter()
                .filter_map(|r| r.get(feature).and_then(|v| v.as_f64()))
                .collect();
            if !values.is_empty() {
                stats.insert(
                    feature.to_string(),
                    values.iter().sum::<f64>() / values.len() as f64,
                );
            }
        }
        Ok(stats)
    }

    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use churn_core::SampleMeta;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn sample(member_id: i64, branch_id: i64, day: NaiveDate, label: Option<LabelType>) -> RawSample {
        let mut meta = SampleMeta::new(member_id, branch_id, day);
        meta.label_type = label;
        RawSample::new(meta)
    }

    #[tokio::test]
    async fn test_training_samples_are_labeled_and_ordered() {
        let store = InMemorySampleStore::new().with_samples(vec![
            sample(2, 1, date(3, 2), Some(LabelType::Active)),
            sample(1, 1, date(3, 2), Some(LabelType::Churn)),
            sample(3, 1, date(3, 1), None),
            sample(4, 1, date(4, 1), Some(LabelType::Active)),
        ]);

        let rows = store.training_samples(date(3, 1), date(4, 1)).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.meta.member_id).collect();
        assert_eq!(ids, vec![1, 2]);

        let snapshot = store.feature_snapshot(date(3, 1), date(4, 1)).await.unwrap();
        assert_eq!(snapshot.len(), 3);
    }

    #[tokio::test]
    async fn test_branch_stats_use_recent_active_rows() {
        let store = InMemorySampleStore::new().with_samples(vec![
            sample(1, 7, date(6, 1), Some(LabelType::Active)).with_column("checkins_last_30d", 10.0),
            sample(2, 7, date(6, 2), Some(LabelType::Active)).with_column("checkins_last_30d", 6.0),
            sample(3, 7, date(6, 2), Some(LabelType::Churn)).with_column("checkins_last_30d", 0.0),
            sample(4, 7, date(1, 2), Some(LabelType::Active)).with_column("checkins_last_30d", 100.0),
            sample(5, 8, date(6, 2), Some(LabelType::Active)).with_column("checkins_last_30d", 50.0),
        ]);

        let stats = store.branch_stats(7, date(5, 1)).await.unwrap();
        assert_eq!(stats.get("checkins_last_30d"), Some(&8.0));
        assert!(!stats.contains_key("checkin_consistency"));
    }

    #[tokio::test]
    async fn test_active_members_filtered_by_branch() {
        let store = InMemorySampleStore::new().with_members(vec![
            sample(1, 59, date(1, 1), None),
            sample(2, 60, date(1, 1), None),
        ]);
        let rows = store.active_members(&[59], date(9, 1)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].meta.reference_date, date(9, 1));

        store.refresh().await.unwrap();
        assert_eq!(store.refresh_count(), 1);
    }
}
