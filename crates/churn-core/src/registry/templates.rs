//! Explanation templates
//!
//! Each feature may carry a short sentence for gym managers. Templates are
//! parsed once and checked against the feature registry when the table is
//! built, so rendering never meets an unknown placeholder.
//!
//! Placeholders:
//! - `{value}`: the raw value (integers without decimals)
//! - `{value:.N}` / `{value:.Nf}`: the raw value with N decimals
//! - `{avg}`: branch comparison average, one decimal
//! - `{pct}`: derived percentage (only for `Derived::DecayPct` / `Derived::Percent`)
//! - `{months}`: value in whole 30-day months (only for `Derived::Months`)

use super::features::FeatureRegistry;
use crate::error::{CoreError, Result};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Derived quantity a template may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derived {
    None,
    /// `(1 - value) * 100` for ratios at or below 1, else 0
    DecayPct,
    /// `value * 100`
    Percent,
    /// `value / 30`
    Months,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Value(Option<usize>),
    Avg,
    Pct,
    Months,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplanationTemplate {
    pub feature: String,
    pub text: String,
    pub derived: Derived,
    segments: Vec<Segment>,
    /// Clause before the first parenthetical, used when the value is missing
    short: Option<Vec<Segment>>,
}

impl ExplanationTemplate {
    pub fn new(feature: &str, text: &str, derived: Derived) -> Result<Self> {
        let segments = parse(text)?;
        for seg in &segments {
            match seg {
                Segment::Pct if !matches!(derived, Derived::DecayPct | Derived::Percent) => {
                    return Err(CoreError::Template(format!(
                        "{}: {{pct}} needs a percentage derivation",
                        feature
                    )))
                }
                Segment::Months if derived != Derived::Months => {
                    return Err(CoreError::Template(format!(
                        "{}: {{months}} needs a months derivation",
                        feature
                    )))
                }
                _ => {}
            }
        }

        let clause = text.split('(').next().unwrap_or("").trim();
        let short = parse(clause)
            .ok()
            .filter(|segs| segs.iter().all(|s| matches!(s, Segment::Literal(_))));

        Ok(Self {
            feature: feature.to_string(),
            text: text.to_string(),
            derived,
            segments,
            short,
        })
    }

    /// Render with a present value
    fn render(&self, value: f64, avg: f64) -> Result<String> {
        if !value.is_finite() {
            return Err(CoreError::Template(format!(
                "{}: non-finite value {}",
                self.feature, value
            )));
        }
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Value(None) => out.push_str(&format_value(value)),
                Segment::Value(Some(p)) => out.push_str(&format!("{:.*}", *p, value)),
                Segment::Avg => out.push_str(&format!("{:.1}", avg)),
                Segment::Pct => out.push_str(&self.pct(value).to_string()),
                Segment::Months => out.push_str(&months(value).to_string()),
            }
        }
        Ok(out)
    }

    /// Render without a value: the leading clause, if it stands alone
    fn render_short(&self) -> Option<String> {
        let segs = self.short.as_ref()?;
        let text: String = segs
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn pct(&self, value: f64) -> i64 {
        match self.derived {
            Derived::DecayPct if value <= 1.0 => ((1.0 - value) * 100.0).trunc() as i64,
            Derived::Percent => (value * 100.0).trunc() as i64,
            _ => 0,
        }
    }
}

fn months(value: f64) -> i64 {
    if value > 0.0 {
        (value / 30.0).trunc() as i64
    } else {
        0
    }
}

/// Integral numbers print without decimals; others with at most two
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let s = format!("{:.2}", value);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn parse(text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(CoreError::Template(format!("unclosed placeholder in '{}'", text)));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(placeholder(&name, text)?);
            }
            '}' => {
                return Err(CoreError::Template(format!("stray '}}' in '{}'", text)));
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn placeholder(spec: &str, text: &str) -> Result<Segment> {
    let (name, format) = match spec.split_once(':') {
        Some((n, f)) => (n, Some(f)),
        None => (spec, None),
    };
    match (name, format) {
        ("value", None) => Ok(Segment::Value(None)),
        ("value", Some(f)) => {
            let digits = f
                .strip_prefix('.')
                .map(|d| d.strip_suffix('f').unwrap_or(d))
                .and_then(|d| d.parse::<usize>().ok())
                .ok_or_else(|| {
                    CoreError::Template(format!("bad format '{}' in '{}'", f, text))
                })?;
            Ok(Segment::Value(Some(digits)))
        }
        ("avg", None) => Ok(Segment::Avg),
        ("pct", None) => Ok(Segment::Pct),
        ("months", None) => Ok(Segment::Months),
        _ => Err(CoreError::Template(format!(
            "unknown placeholder '{{{}}}' in '{}'",
            spec, text
        ))),
    }
}

/// Per-feature template lookup, validated against a feature registry
#[derive(Debug, Clone)]
pub struct TemplateTable {
    templates: HashMap<String, ExplanationTemplate>,
}

impl TemplateTable {
    pub fn build(templates: Vec<ExplanationTemplate>, registry: &FeatureRegistry) -> Result<Self> {
        let mut map = HashMap::new();
        for t in templates {
            if !registry.contains(&t.feature) {
                return Err(CoreError::UnknownFeature(t.feature.clone()));
            }
            if map.contains_key(&t.feature) {
                return Err(CoreError::Template(format!(
                    "duplicate template for '{}'",
                    t.feature
                )));
            }
            map.insert(t.feature.clone(), t);
        }
        Ok(Self { templates: map })
    }

    /// English templates for the standard registry
    pub fn standard() -> Result<&'static TemplateTable> {
        static STANDARD: OnceLock<TemplateTable> = OnceLock::new();
        if let Some(table) = STANDARD.get() {
            return Ok(table);
        }
        let templates = standard_templates()?;
        let table = Self::build(templates, FeatureRegistry::standard())?;
        Ok(STANDARD.get_or_init(|| table))
    }

    pub fn get(&self, feature: &str) -> Option<&ExplanationTemplate> {
        self.templates.get(feature)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render an explanation. Never fails: lookup misses and rendering errors
    /// produce a generic directional sentence.
    pub fn render(&self, feature: &str, value: Option<f64>, avg: Option<f64>, impact: f64) -> String {
        let Some(template) = self.get(feature) else {
            return generic(feature, impact);
        };
        let rendered = match value {
            Some(v) => template.render(v, avg.unwrap_or(0.0)).ok(),
            None => template.render_short(),
        };
        match rendered {
            Some(text) => text,
            None => {
                tracing::debug!(
                    "Template rendering failed for {} (value={:?}), using generic sentence",
                    feature,
                    value
                );
                generic(feature, impact)
            }
        }
    }
}

/// Fallback sentence stating the direction of influence
pub fn generic(feature: &str, impact: f64) -> String {
    let direction = if impact > 0.0 { "increases" } else { "decreases" };
    format!("{} {} churn risk", feature, direction)
}

fn standard_templates() -> Result<Vec<ExplanationTemplate>> {
    use Derived::*;
    [
        ("days_since_last_checkin", "No check-in for {value} days (branch average: {avg} days)", None),
        ("checkin_trend", "Visit frequency dropped {pct}% over the last 2 weeks", DecayPct),
        ("days_until_contract_end", "Contract ends in {value} days", None),
        ("contract_expiring_30d", "Contract is close to its monthly renewal", None),
        ("has_open_receivable", "Has an open unpaid installment", None),
        ("is_defaulter", "In default: turnstile access blocked", None),
        ("checkins_last_30d", "Only {value} check-ins in the last 30 days (branch average: {avg})", None),
        ("checkins_last_7d", "Only {value} check-in(s) in the last week", None),
        ("total_previous_churns", "Has cancelled {value} time(s) before", None),
        ("payment_regularity", "Payment regularity: {pct}% (below average)", Percent),
        ("avg_monthly_payment_90d", "Average monthly payment: R${value:.2f}", None),
        ("checkin_consistency", "Irregular attendance ({value:.0f} days of variation between visits)", None),
        ("tenure_days", "Member for only {months} months (critical period)", Months),
        ("peak_hour_ratio", "Trains {pct}% of the time at peak hours", Percent),
        ("has_ever_checked_in", "Has never checked in at the gym", None),
        ("current_spell_duration_days", "On the current plan for only {value} days", None),
        ("avg_weekly_checkins_90d", "Averages {value:.1f} workouts per week (below average)", None),
        ("weekend_ratio", "Trains mostly on weekends ({pct}%)", Percent),
        ("visited_other_branch", "Visited another branch (possible dissatisfaction)", None),
        ("is_resolution_signup", "Signed up in January or February (New Year resolution)", None),
        ("had_segment_migration", "Has moved between regular and aggregator plans", None),
        ("idade", "Age bracket with higher cancellation risk", None),
        ("days_since_last_payment", "Last payment {value} days ago", None),
        ("contracts_in_current_spell", "Only {value} renewal(s) in the current period", None),
        ("total_previous_spells", "Had {value} previous period(s) of activity", None),
        ("month_of_year", "Month with a history of higher cancellation", None),
        ("gender", "Demographic profile with higher risk", None),
    ]
    .into_iter()
    .map(|(feature, text, derived)| ExplanationTemplate::new(feature, text, derived))
    .collect()
}
