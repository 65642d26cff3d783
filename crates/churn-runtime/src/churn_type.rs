//! Churn-type rule engine and playbook assignment
//!
//! Deterministic and explainable: no learned parameters. Only HIGH and
//! MEDIUM rows get a churn type; LOW is always `NONE`.
//!
//! Priority: DEFAULT > FULL > BEHAVIORAL > FINANCIAL > NONE. A defaulter is
//! blocked at the turnstile, so their absence is never counted as a
//! behavioral choice.

use crate::error::{Result, RuntimeError};
use churn_core::registry::{ChurnRules, ModelConfig};
use churn_core::{ChurnType, FeatureTable, RiskTier};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Boolean signals feeding the rule engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChurnSignals {
    pub is_defaulter: bool,
    pub behavioral: bool,
    pub financial: bool,
}

impl ChurnSignals {
    /// Derive signals from raw values. Missing values (`None` or NaN) never
    /// satisfy a comparison.
    pub fn from_values(
        days_since_last_checkin: Option<f64>,
        has_ever_checked_in: Option<f64>,
        has_open_receivable: Option<f64>,
        is_defaulter: Option<f64>,
        rules: &ChurnRules,
    ) -> Self {
        let is_defaulter = is_one(is_defaulter);
        let absent = days_since_last_checkin
            .is_some_and(|d| d >= rules.behavioral_churn_days)
            || has_ever_checked_in == Some(0.0);
        Self {
            is_defaulter,
            behavioral: absent && !is_defaulter,
            financial: is_one(has_open_receivable) && !is_defaulter,
        }
    }
}

fn is_one(v: Option<f64>) -> bool {
    v == Some(1.0)
}

/// Classify one row
pub fn classify(tier: RiskTier, signals: &ChurnSignals) -> ChurnType {
    if !tier.is_at_risk() {
        return ChurnType::None;
    }
    match (signals.is_defaulter, signals.behavioral, signals.financial) {
        (true, _, _) => ChurnType::Default,
        (false, true, true) => ChurnType::Full,
        (false, true, false) => ChurnType::Behavioral,
        (false, false, true) => ChurnType::Financial,
        (false, false, false) => ChurnType::None,
    }
}

/// `"{TIER}_{TYPE}"`, the playbook lookup key
pub fn playbook_key(tier: RiskTier, churn_type: ChurnType) -> String {
    format!("{}_{}", tier.as_str(), churn_type.as_str())
}

#[derive(Debug, Clone)]
pub struct ChurnTypeClassifier {
    rules: ChurnRules,
    playbooks: BTreeMap<String, String>,
    default_playbook: String,
}

impl ChurnTypeClassifier {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            rules: config.rules.clone(),
            playbooks: config.playbooks.clone(),
            default_playbook: config.default_playbook.clone(),
        }
    }

    /// Signals for every row of a prepared feature table.
    ///
    /// `days_since_last_checkin` and `has_ever_checked_in` are required;
    /// absent `is_defaulter` / `has_open_receivable` columns read as false.
    pub fn signals(&self, table: &FeatureTable) -> Result<Vec<ChurnSignals>> {
        let required = ["days_since_last_checkin", "has_ever_checked_in"];
        let missing: Vec<String> = required
            .iter()
            .filter(|c| table.column_index(c).is_none())
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(RuntimeError::MissingFeature(missing));
        }

        Ok((0..table.len())
            .map(|i| {
                ChurnSignals::from_values(
                    table.value(i, "days_since_last_checkin"),
                    table.value(i, "has_ever_checked_in"),
                    table.value(i, "has_open_receivable"),
                    table.value(i, "is_defaulter"),
                    &self.rules,
                )
            })
            .collect())
    }

    pub fn classify_table(&self, table: &FeatureTable, tiers: &[RiskTier]) -> Result<Vec<ChurnType>> {
        if tiers.len() != table.len() {
            return Err(RuntimeError::InvalidInput(format!(
                "{} tiers for {} rows",
                tiers.len(),
                table.len()
            )));
        }
        let types: Vec<ChurnType> = self
            .signals(table)?
            .iter()
            .zip(tiers)
            .map(|(s, &tier)| classify(tier, s))
            .collect();

        let mut counts: HashMap<ChurnType, usize> = HashMap::new();
        for t in &types {
            *counts.entry(*t).or_default() += 1;
        }
        info!("Churn type distribution:");
        for t in ChurnType::ALL {
            if let Some(&n) = counts.get(&t) {
                info!("  {}: {} ({:.1}%)", t, n, n as f64 / types.len() as f64 * 100.0);
            }
        }
        Ok(types)
    }

    /// Playbook id for a combination; unknown keys fall back to the default
    pub fn playbook(&self, tier: RiskTier, churn_type: ChurnType) -> &str {
        let key = playbook_key(tier, churn_type);
        match self.playbooks.get(&key) {
            Some(id) => id,
            None => {
                debug!("No playbook for {}, using {}", key, self.default_playbook);
                &self.default_playbook
            }
        }
    }

    pub fn assign_playbooks(&self, tiers: &[RiskTier], types: &[ChurnType]) -> Vec<String> {
        let ids: Vec<String> = tiers
            .iter()
            .zip(types)
            .map(|(&t, &c)| self.playbook(t, c).to_string())
            .collect();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for id in &ids {
            *counts.entry(id.as_str()).or_default() += 1;
        }
        info!("Playbook assignment distribution:");
        for (id, n) in counts {
            info!("  {}: {}", id, n);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ChurnRules {
        ChurnRules::default()
    }

    #[test]
    fn test_defaulter_dominates_every_other_signal() {
        let signals = ChurnSignals::from_values(Some(45.0), Some(1.0), Some(1.0), Some(1.0), &rules());
        assert!(signals.is_defaulter);
        assert!(!signals.behavioral);
        assert!(!signals.financial);
        assert_eq!(classify(RiskTier::High, &signals), ChurnType::Default);
        assert_eq!(classify(RiskTier::Medium, &signals), ChurnType::Default);
    }

    #[test]
    fn test_low_tier_is_always_none() {
        for d in [false, true] {
            for b in [false, true] {
                for f in [false, true] {
                    let s = ChurnSignals {
                        is_defaulter: d,
                        behavioral: b,
                        financial: f,
                    };
                    assert_eq!(classify(RiskTier::Low, &s), ChurnType::None);
                }
            }
        }
    }

    #[test]
    fn test_priority_order() {
        let s = |b, f| ChurnSignals {
            is_defaulter: false,
            behavioral: b,
            financial: f,
        };
        assert_eq!(classify(RiskTier::High, &s(true, true)), ChurnType::Full);
        assert_eq!(classify(RiskTier::High, &s(true, false)), ChurnType::Behavioral);
        assert_eq!(classify(RiskTier::High, &s(false, true)), ChurnType::Financial);
        assert_eq!(classify(RiskTier::High, &s(false, false)), ChurnType::None);
    }

    #[test]
    fn test_behavioral_signal() {
        let r = rules();
        assert!(ChurnSignals::from_values(Some(10.0), Some(1.0), None, None, &r).behavioral);
        assert!(!ChurnSignals::from_values(Some(9.0), Some(1.0), None, None, &r).behavioral);
        // never checked in
        assert!(ChurnSignals::from_values(None, Some(0.0), None, None, &r).behavioral);
        // unknown history is not a signal
        assert!(!ChurnSignals::from_values(None, None, None, None, &r).behavioral);
    }

    #[test]
    fn test_unknown_playbook_falls_back() {
        let classifier = ChurnTypeClassifier::new(&ModelConfig::default());
        assert_eq!(classifier.playbook(RiskTier::High, ChurnType::Default), "PB_HIGH_FINANCIAL");
        assert_eq!(classifier.playbook(RiskTier::Medium, ChurnType::Full), "PB_LOW_ACTIVE");
        assert_eq!(classifier.playbook(RiskTier::Low, ChurnType::Behavioral), "PB_LOW_ACTIVE");
    }
}
