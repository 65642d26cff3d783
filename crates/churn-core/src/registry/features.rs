//! Feature registry
//!
//! Immutable catalog of the model's feature columns: semantic group, encoding
//! kind and the specialist each feature feeds. A feature belongs to exactly one
//! specialist because specialists are assigned per group.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

/// Name of the binary target column
pub const TARGET: &str = "churned_in_30d";

/// Semantic feature group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureGroup {
    Tenure,
    Frequency,
    Engagement,
    Recency,
    Financial,
    Seasonality,
    Demographic,
    Segment,
}

impl FeatureGroup {
    /// Canonical column order
    pub const ALL: [FeatureGroup; 8] = [
        FeatureGroup::Tenure,
        FeatureGroup::Frequency,
        FeatureGroup::Engagement,
        FeatureGroup::Recency,
        FeatureGroup::Financial,
        FeatureGroup::Seasonality,
        FeatureGroup::Demographic,
        FeatureGroup::Segment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureGroup::Tenure => "tenure",
            FeatureGroup::Frequency => "frequency",
            FeatureGroup::Engagement => "engagement",
            FeatureGroup::Recency => "recency",
            FeatureGroup::Financial => "financial",
            FeatureGroup::Seasonality => "seasonality",
            FeatureGroup::Demographic => "demographic",
            FeatureGroup::Segment => "segment",
        }
    }

    pub fn specialist(&self) -> Specialist {
        match self {
            FeatureGroup::Frequency | FeatureGroup::Engagement => Specialist::Frequency,
            FeatureGroup::Financial => Specialist::Financial,
            FeatureGroup::Tenure | FeatureGroup::Recency => Specialist::Tenure,
            FeatureGroup::Seasonality | FeatureGroup::Demographic | FeatureGroup::Segment => {
                Specialist::Context
            }
        }
    }
}

/// How a raw column is turned into a model input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Continuous,
    /// Coerced to {0.0, 1.0, NaN}
    Boolean,
    /// Mapped to a numeric category code
    Categorical,
}

/// The four level-0 specialists. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Specialist {
    #[serde(rename = "xgb_freq")]
    Frequency,
    #[serde(rename = "xgb_fin")]
    Financial,
    #[serde(rename = "xgb_tenure")]
    Tenure,
    #[serde(rename = "xgb_context")]
    Context,
}

impl Specialist {
    /// Meta-learner input order
    pub const ALL: [Specialist; 4] = [
        Specialist::Frequency,
        Specialist::Financial,
        Specialist::Tenure,
        Specialist::Context,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Specialist::Frequency => "xgb_freq",
            Specialist::Financial => "xgb_fin",
            Specialist::Tenure => "xgb_tenure",
            Specialist::Context => "xgb_context",
        }
    }

    /// Slot in `Specialist::ALL`
    pub fn index(&self) -> usize {
        match self {
            Specialist::Frequency => 0,
            Specialist::Financial => 1,
            Specialist::Tenure => 2,
            Specialist::Context => 3,
        }
    }

    pub fn groups(&self) -> Vec<FeatureGroup> {
        FeatureGroup::ALL
            .into_iter()
            .filter(|g| g.specialist() == *self)
            .collect()
    }

    pub fn parse(name: &str) -> Option<Self> {
        Specialist::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for Specialist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One model feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    pub name: String,
    pub group: FeatureGroup,
    pub encoding: Encoding,
    /// Computed by the loader instead of read from the warehouse
    #[serde(default)]
    pub derived: bool,
    /// Null for members without check-in history; relaxed circuit-breaker threshold
    #[serde(default)]
    pub sparse: bool,
}

impl FeatureDef {
    fn new(name: &str, group: FeatureGroup) -> Self {
        Self {
            name: name.to_string(),
            group,
            encoding: Encoding::Continuous,
            derived: false,
            sparse: false,
        }
    }

    fn boolean(mut self) -> Self {
        self.encoding = Encoding::Boolean;
        self
    }

    fn categorical(mut self) -> Self {
        self.encoding = Encoding::Categorical;
        self
    }

    fn derived(mut self) -> Self {
        self.derived = true;
        self
    }

    fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }
}

/// Immutable feature catalog
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    features: Vec<FeatureDef>,
    by_name: HashMap<String, usize>,
    all_names: Vec<String>,
    specialists: [Vec<String>; 4],
    passthrough: Vec<String>,
}

impl FeatureRegistry {
    /// Build and validate a registry. Features are reordered into canonical group order.
    pub fn build(features: Vec<FeatureDef>, passthrough: Vec<String>) -> Result<Self> {
        let registry = Self::assemble(features, passthrough);
        registry.validate()?;
        Ok(registry)
    }

    /// The production registry, built once per process
    pub fn standard() -> &'static FeatureRegistry {
        static STANDARD: OnceLock<FeatureRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| Self::assemble(standard_features(), standard_passthrough()))
    }

    fn assemble(mut features: Vec<FeatureDef>, passthrough: Vec<String>) -> Self {
        features.sort_by_key(|f| {
            FeatureGroup::ALL
                .iter()
                .position(|g| *g == f.group)
                .unwrap_or(usize::MAX)
        });

        let mut by_name = HashMap::new();
        let mut specialists: [Vec<String>; 4] = Default::default();
        for (i, f) in features.iter().enumerate() {
            by_name.entry(f.name.clone()).or_insert(i);
            specialists[f.group.specialist().index()].push(f.name.clone());
        }
        let all_names = features.iter().map(|f| f.name.clone()).collect();

        Self {
            features,
            by_name,
            all_names,
            specialists,
            passthrough,
        }
    }

    /// Check names are unique, every specialist has inputs and passthrough columns exist
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for f in &self.features {
            if f.name.is_empty() {
                return Err(CoreError::Config("feature with empty name".to_string()));
            }
            if !seen.insert(f.name.as_str()) {
                return Err(CoreError::Config(format!("duplicate feature '{}'", f.name)));
            }
        }

        for s in Specialist::ALL {
            if self.specialists[s.index()].is_empty() {
                return Err(CoreError::Config(format!("specialist '{}' has no features", s)));
            }
        }

        let mut seen = HashSet::new();
        for p in &self.passthrough {
            if !self.by_name.contains_key(p) {
                return Err(CoreError::UnknownFeature(p.clone()));
            }
            if !seen.insert(p.as_str()) {
                return Err(CoreError::Config(format!("duplicate passthrough feature '{}'", p)));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FeatureDef> {
        self.by_name.get(name).map(|&i| &self.features[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn definitions(&self) -> &[FeatureDef] {
        &self.features
    }

    /// All model columns in canonical order
    pub fn all_features(&self) -> &[String] {
        &self.all_names
    }

    pub fn specialist_features(&self, specialist: Specialist) -> &[String] {
        &self.specialists[specialist.index()]
    }

    pub fn specialist_of(&self, name: &str) -> Option<Specialist> {
        self.get(name).map(|f| f.group.specialist())
    }

    pub fn group_features(&self, group: FeatureGroup) -> Vec<String> {
        self.features
            .iter()
            .filter(|f| f.group == group)
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn boolean_features(&self) -> Vec<String> {
        self.names_where(|f| f.encoding == Encoding::Boolean)
    }

    pub fn categorical_features(&self) -> Vec<String> {
        self.names_where(|f| f.encoding == Encoding::Categorical)
    }

    /// Columns the sample store must deliver
    pub fn raw_features(&self) -> Vec<String> {
        self.names_where(|f| !f.derived)
    }

    pub fn derived_features(&self) -> Vec<String> {
        self.names_where(|f| f.derived)
    }

    pub fn sparse_features(&self) -> Vec<String> {
        self.names_where(|f| f.sparse)
    }

    /// Raw signals fed directly to the meta-learner
    pub fn passthrough_features(&self) -> &[String] {
        &self.passthrough
    }

    pub fn target(&self) -> &'static str {
        TARGET
    }

    fn names_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&FeatureDef) -> bool,
    {
        self.features
            .iter()
            .filter(|f| predicate(f))
            .map(|f| f.name.clone())
            .collect()
    }
}

fn standard_features() -> Vec<FeatureDef> {
    use FeatureGroup::*;
    vec![
        // ========== Tenure ==========
        FeatureDef::new("tenure_days", Tenure),
        FeatureDef::new("current_spell_duration_days", Tenure),
        FeatureDef::new("contracts_in_current_spell", Tenure),
        FeatureDef::new("total_previous_spells", Tenure),
        FeatureDef::new("total_previous_churns", Tenure),
        // ========== Frequency ==========
        FeatureDef::new("checkins_last_7d", Frequency).sparse(),
        FeatureDef::new("checkins_last_14d", Frequency).sparse(),
        FeatureDef::new("checkins_last_30d", Frequency).sparse(),
        FeatureDef::new("checkins_last_90d", Frequency).sparse(),
        FeatureDef::new("days_since_last_checkin", Frequency).sparse(),
        FeatureDef::new("checkin_trend", Frequency).sparse(),
        FeatureDef::new("avg_weekly_checkins_90d", Frequency).sparse(),
        FeatureDef::new("checkin_consistency", Frequency).sparse(),
        FeatureDef::new("weekend_ratio", Frequency).sparse(),
        // ~37% of members have no check-in history
        FeatureDef::new("has_ever_checked_in", Frequency).boolean().derived(),
        // ========== Engagement ==========
        FeatureDef::new("peak_hour_ratio", Engagement).sparse(),
        FeatureDef::new("visited_other_branch", Engagement).boolean(),
        // ========== Recency ==========
        FeatureDef::new("days_until_contract_end", Recency),
        FeatureDef::new("contract_expiring_30d", Recency).boolean(),
        FeatureDef::new("days_since_last_payment", Recency),
        // ========== Financial ==========
        FeatureDef::new("avg_monthly_payment_90d", Financial),
        FeatureDef::new("payment_regularity", Financial),
        FeatureDef::new("has_open_receivable", Financial).boolean(),
        // Blocked at the turnstile for non-payment
        FeatureDef::new("is_defaulter", Financial).boolean().derived(),
        // ========== Seasonality ==========
        FeatureDef::new("month_of_year", Seasonality),
        FeatureDef::new("is_resolution_signup", Seasonality).boolean(),
        // ========== Demographic ==========
        FeatureDef::new("idade", Demographic),
        FeatureDef::new("gender", Demographic).categorical(),
        // ========== Segment ==========
        FeatureDef::new("had_segment_migration", Segment).boolean(),
    ]
}

fn standard_passthrough() -> Vec<String> {
    ["days_since_last_checkin", "days_until_contract_end", "checkin_trend"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
