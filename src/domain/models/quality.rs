//! Quality domains and validation results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Name of the fallback domain.
pub const GENERIC_DOMAIN: &str = "GENERIC";

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// Acceptance bounds for one metric.
///
/// A value inside `[minimum, maximum]` scores 1.0. Outside the bounds the
/// score falls linearly, reaching 0.0 at `tolerance` past the violated bound.
///
/// An optional metric (`required: false`) that is absent from a result is
/// left out of the weighted score instead of failing the validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub minimum: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_required")]
    pub required: bool,
}

const fn default_required() -> bool {
    true
}

const fn default_weight() -> f64 {
    1.0
}

const fn default_tolerance() -> f64 {
    0.2
}

const fn default_pass_threshold() -> f64 {
    0.8
}

impl MetricThreshold {
    pub const fn at_least(minimum: f64, weight: f64) -> Self {
        Self {
            minimum,
            maximum: None,
            weight,
            tolerance: default_tolerance(),
            required: true,
        }
    }

    pub const fn between(minimum: f64, maximum: f64, weight: f64) -> Self {
        Self {
            minimum,
            maximum: Some(maximum),
            weight,
            tolerance: default_tolerance(),
            required: true,
        }
    }

    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Normalized score in `[0, 1]` for an observed value.
    pub fn score(&self, value: f64) -> f64 {
        let distance = if value < self.minimum {
            self.minimum - value
        } else if let Some(max) = self.maximum.filter(|max| value > *max) {
            value - max
        } else {
            return 1.0;
        };

        if self.tolerance <= 0.0 {
            return 0.0;
        }
        (1.0 - distance / self.tolerance).clamp(0.0, 1.0)
    }
}

/// Named set of weighted metric thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityDomainConfig {
    pub name: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricThreshold>,
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
}

impl QualityDomainConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_uppercase(),
            metrics: BTreeMap::new(),
            pass_threshold: default_pass_threshold(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, threshold: MetricThreshold) -> Self {
        self.metrics.insert(name.into(), threshold);
        self
    }

    #[must_use]
    pub const fn with_pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    pub fn total_weight(&self) -> f64 {
        self.metrics.values().map(|m| m.weight).sum()
    }

    pub fn business() -> Self {
        Self::new("BUSINESS")
            .with_metric("confidence_score", MetricThreshold::at_least(0.75, 2.0))
            .with_metric("risk_tolerance", MetricThreshold::between(0.6, 0.8, 1.0))
    }

    pub fn academic() -> Self {
        Self::new("ACADEMIC")
            .with_metric("research_confidence", MetricThreshold::at_least(0.8, 2.0))
            .with_metric("evidence_quality", MetricThreshold::at_least(0.7, 1.5))
    }

    pub fn service() -> Self {
        Self::new("SERVICE")
            .with_metric("uptime", MetricThreshold::at_least(0.99, 2.0))
            .with_metric("reliability", MetricThreshold::at_least(0.95, 1.5))
    }

    pub fn generic() -> Self {
        Self::new(GENERIC_DOMAIN)
            .with_metric("accuracy", MetricThreshold::at_least(0.8, 2.0))
            .with_metric("completeness", MetricThreshold::at_least(0.9, 1.5))
            .with_metric("relevance", MetricThreshold::at_least(0.85, 1.0))
    }

    /// Domains available without any configuration.
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::business(),
            Self::academic(),
            Self::service(),
            Self::generic(),
        ]
    }
}

/// One finding produced by a validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub metric: String,
    pub message: String,
}

impl QualityIssue {
    pub fn new(severity: Severity, metric: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            metric: metric.into(),
            message: message.into(),
        }
    }
}

/// Outcome of validating one result against one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    pub passed: bool,
    pub score: f64,
    pub issues: Vec<QualityIssue>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl QualityResult {
    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Issues at or above `severity`, one per line, as `[severity] metric: message`.
    pub fn summary(&self, severity: Severity) -> String {
        self.issues
            .iter()
            .filter(|i| i.severity >= severity)
            .map(|i| format!("[{}] {}: {}", i.severity.as_str(), i.metric, i.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
