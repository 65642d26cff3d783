//! Sample rows: one (member, reference_date) observation

use super::value::Value;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label kind attached to a training sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LabelType {
    Churn,
    Active,
}

impl LabelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelType::Churn => "CHURN",
            LabelType::Active => "ACTIVE",
        }
    }

    /// Parse a warehouse label; unknown labels (e.g. censored rows) are `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CHURN" => Some(LabelType::Churn),
            "ACTIVE" => Some(LabelType::Active),
            _ => None,
        }
    }
}

/// Identifying metadata of a sample (never used as a model feature)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMeta {
    pub member_id: i64,
    pub branch_id: i64,
    pub reference_date: NaiveDate,
    /// e.g. "at_spell_end"
    #[serde(default)]
    pub prediction_horizon: Option<String>,
    #[serde(default)]
    pub label_type: Option<LabelType>,
}

impl SampleMeta {
    pub fn new(member_id: i64, branch_id: i64, reference_date: NaiveDate) -> Self {
        Self {
            member_id,
            branch_id,
            reference_date,
            prediction_horizon: None,
            label_type: None,
        }
    }

    pub fn with_label_type(mut self, label_type: LabelType) -> Self {
        self.label_type = Some(label_type);
        self
    }

    pub fn with_horizon(mut self, horizon: impl Into<String>) -> Self {
        self.prediction_horizon = Some(horizon.into());
        self
    }
}

/// An untyped row as returned by the sample store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub meta: SampleMeta,
    /// Target `churned_in_30d`; absent for scoring rows
    #[serde(default)]
    pub churned_in_30d: Option<bool>,
    /// Feature columns keyed by registry name
    pub columns: HashMap<String, Value>,
}

impl RawSample {
    pub fn new(meta: SampleMeta) -> Self {
        Self {
            meta,
            churned_in_30d: None,
            columns: HashMap::new(),
        }
    }

    pub fn with_label(mut self, churned: bool) -> Self {
        self.churned_in_30d = Some(churned);
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.get(name)
    }
}
