//! Typed feature table
//!
//! Row-major `f64` matrix with named columns, per-row sample metadata and an
//! optional binary label. Missing values are `NaN` and stay `NaN`: the
//! boosted trees treat missingness as signal.

use super::sample::SampleMeta;
use crate::error::{CoreError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    meta: Vec<SampleMeta>,
    rows: Vec<Vec<f64>>,
    labels: Vec<Option<u8>>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Self {
            columns,
            index,
            meta: Vec::new(),
            rows: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn push_row(&mut self, meta: SampleMeta, values: Vec<f64>, label: Option<u8>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(CoreError::InvalidValue(format!(
                "row for member {} has {} values, table has {} columns",
                meta.member_id,
                values.len(),
                self.columns.len()
            )));
        }
        self.meta.push(meta);
        self.rows.push(values);
        self.labels.push(label);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn meta(&self) -> &[SampleMeta] {
        &self.meta
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    pub fn cell(&self, i: usize, j: usize) -> f64 {
        self.rows[i][j]
    }

    /// Non-missing value of a named column, `None` for NaN or unknown column
    pub fn value(&self, i: usize, name: &str) -> Option<f64> {
        let j = self.column_index(name)?;
        let v = self.rows.get(i)?[j];
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let j = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[j]).collect())
    }

    /// Overwrite a column, appending it when the table does not have it yet
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(CoreError::InvalidValue(format!(
                "column '{}' has {} values, table has {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }
        match self.column_index(name) {
            Some(j) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[j] = v;
                }
            }
            None => {
                self.index.insert(name.to_string(), self.columns.len());
                self.columns.push(name.to_string());
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
        Ok(())
    }

    pub fn labels(&self) -> &[Option<u8>] {
        &self.labels
    }

    /// Labels as 0/1, failing when any row is unlabeled
    pub fn targets(&self) -> Result<Vec<u8>> {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, l)| {
                l.ok_or_else(|| {
                    CoreError::InvalidValue(format!(
                        "row {} (member {}) has no churned_in_30d label",
                        i, self.meta[i].member_id
                    ))
                })
            })
            .collect()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|l| **l == Some(1)).count()
    }

    /// New table containing the given rows, in the given order
    pub fn select(&self, indices: &[usize]) -> FeatureTable {
        FeatureTable {
            columns: self.columns.clone(),
            index: self.index.clone(),
            meta: indices.iter().map(|&i| self.meta[i].clone()).collect(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    pub fn filter<F>(&self, predicate: F) -> FeatureTable
    where
        F: Fn(&SampleMeta) -> bool,
    {
        let indices: Vec<usize> = self
            .meta
            .iter()
            .enumerate()
            .filter(|(_, m)| predicate(m))
            .map(|(i, _)| i)
            .collect();
        self.select(&indices)
    }

    /// Matrix of the named columns in the given order
    pub fn project(&self, names: &[String]) -> Result<Vec<Vec<f64>>> {
        let missing = self.missing_columns(names);
        if !missing.is_empty() {
            return Err(CoreError::MissingFeature(missing));
        }
        let positions: Vec<usize> = names.iter().filter_map(|n| self.column_index(n)).collect();
        Ok(self
            .rows
            .iter()
            .map(|r| positions.iter().map(|&j| r[j]).collect())
            .collect())
    }

    /// Same rows restricted to the named columns, in the given order
    pub fn with_columns(&self, names: &[String]) -> Result<FeatureTable> {
        let rows = self.project(names)?;
        let mut table = FeatureTable::new(names.to_vec());
        table.meta = self.meta.clone();
        table.rows = rows;
        table.labels = self.labels.clone();
        Ok(table)
    }

    pub fn missing_columns(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|n| !self.index.contains_key(n.as_str()))
            .cloned()
            .collect()
    }

    /// Share of NaN values in a column (`None` for unknown column or empty table)
    pub fn null_rate(&self, name: &str) -> Option<f64> {
        let j = self.column_index(name)?;
        if self.rows.is_empty() {
            return None;
        }
        let nulls = self.rows.iter().filter(|r| r[j].is_nan()).count();
        Some(nulls as f64 / self.rows.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn meta(id: i64, day: u32) -> SampleMeta {
        SampleMeta::new(id, 1, NaiveDate::from_ymd_opt(2025, 1, day).unwrap())
    }

    fn sample_table() -> FeatureTable {
        let mut table = FeatureTable::new(vec!["a".to_string(), "b".to_string()]);
        table.push_row(meta(1, 1), vec![1.0, f64::NAN], Some(0)).unwrap();
        table.push_row(meta(2, 2), vec![2.0, 5.0], Some(1)).unwrap();
        table.push_row(meta(3, 3), vec![3.0, 6.0], Some(0)).unwrap();
        table
    }

    #[test]
    fn test_push_row_rejects_wrong_width() {
        let mut table = FeatureTable::new(vec!["a".to_string()]);
        assert!(table.push_row(meta(1, 1), vec![1.0, 2.0], None).is_err());
    }

    #[test]
    fn test_value_hides_nan() {
        let table = sample_table();
        assert_eq!(table.value(0, "b"), None);
        assert_eq!(table.value(1, "b"), Some(5.0));
        assert_eq!(table.value(1, "zzz"), None);
    }

    #[test]
    fn test_set_column_appends_and_overwrites() {
        let mut table = sample_table();
        table.set_column("c", vec![7.0, 8.0, 9.0]).unwrap();
        assert_eq!(table.columns().len(), 3);
        assert_eq!(table.value(2, "c"), Some(9.0));

        table.set_column("a", vec![0.0, 0.0, 0.0]).unwrap();
        assert_eq!(table.column("a").unwrap(), vec![0.0, 0.0, 0.0]);
        assert!(table.set_column("d", vec![1.0]).is_err());
    }

    #[test]
    fn test_project_reports_every_missing_column() {
        let table = sample_table();
        let err = table
            .project(&["a".to_string(), "x".to_string(), "y".to_string()])
            .unwrap_err();
        match err {
            CoreError::MissingFeature(names) => assert_eq!(names, vec!["x", "y"]),
            other => panic!("unexpected error: {other}"),
        }

        let matrix = table.project(&["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(matrix[2], vec![6.0, 3.0]);
    }

    #[test]
    fn test_filter_and_positives() {
        let table = sample_table();
        assert_eq!(table.positives(), 1);
        let late = table.filter(|m| m.reference_date >= NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        assert_eq!(late.len(), 2);
        assert_eq!(late.meta()[0].member_id, 2);
        assert_eq!(late.targets().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_null_rate() {
        let table = sample_table();
        let rate = table.null_rate("b").unwrap();
        assert!((rate - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(table.null_rate("a"), Some(0.0));
    }

    #[test]
    fn test_targets_require_labels() {
        let mut table = FeatureTable::new(vec!["a".to_string()]);
        table.push_row(meta(1, 1), vec![1.0], None).unwrap();
        assert!(table.targets().is_err());
    }
}
