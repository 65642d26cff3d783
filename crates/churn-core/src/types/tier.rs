//! Risk tiers and churn types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk tier derived from a calibrated probability.
///
/// Ordering follows risk: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub const ALL: [RiskTier; 3] = [RiskTier::High, RiskTier::Medium, RiskTier::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::High => "HIGH",
            RiskTier::Medium => "MEDIUM",
            RiskTier::Low => "LOW",
        }
    }

    /// Threshold a probability: `p >= high` is HIGH, `p >= medium` is MEDIUM, else LOW.
    pub fn from_probability(p: f64, high: f64, medium: f64) -> Self {
        if p >= high {
            RiskTier::High
        } else if p >= medium {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    /// Tiers that receive a churn type and an intervention playbook
    pub fn is_at_risk(&self) -> bool {
        matches!(self, RiskTier::High | RiskTier::Medium)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(RiskTier::High),
            "MEDIUM" => Some(RiskTier::Medium),
            "LOW" => Some(RiskTier::Low),
            _ => None,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Churn type assigned by the rule engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChurnType {
    /// Blocked at the turnstile for non-payment (forced absence)
    Default,
    /// Behavioral and financial signals together
    Full,
    /// Voluntary absence
    Behavioral,
    /// Open receivable, not yet in default
    Financial,
    None,
}

impl ChurnType {
    pub const ALL: [ChurnType; 5] = [
        ChurnType::Default,
        ChurnType::Full,
        ChurnType::Behavioral,
        ChurnType::Financial,
        ChurnType::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChurnType::Default => "DEFAULT",
            ChurnType::Full => "FULL",
            ChurnType::Behavioral => "BEHAVIORAL",
            ChurnType::Financial => "FINANCIAL",
            ChurnType::None => "NONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for ChurnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
