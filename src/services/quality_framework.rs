//! Quality threshold framework.
//!
//! Scores a candidate result against the weighted metric thresholds of a
//! named domain. Metric values are looked up in structured fields first and
//! fall back to `name: value` annotations in free text.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::domain::models::{
    Message, Part, QualityConfig, QualityDomainConfig, QualityIssue, QualityResult, Severity,
    GENERIC_DOMAIN,
};

struct Domain {
    config: QualityDomainConfig,
    patterns: BTreeMap<String, Regex>,
}

impl Domain {
    fn new(config: QualityDomainConfig) -> Self {
        let patterns = config
            .metrics
            .keys()
            .filter_map(|name| metric_pattern(name).map(|re| (name.clone(), re)))
            .collect();
        Self { config, patterns }
    }
}

/// `name: 0.9`, `name = 90%`, with `_` in the name also matching a space.
fn metric_pattern(name: &str) -> Option<Regex> {
    let name = regex::escape(name).replace('_', "[_ ]");
    Regex::new(&format!(r"(?i)\b{name}\b\s*[:=]\s*(-?\d+(?:\.\d+)?)\s*(%)?")).ok()
}

/// Validates results against quality domains.
///
/// Domain names are case-insensitive. The configuration is read-only after
/// construction so one instance can serve concurrent validations.
pub struct QualityFramework {
    domains: BTreeMap<String, Domain>,
}

impl Default for QualityFramework {
    fn default() -> Self {
        Self::new(&QualityConfig::default())
    }
}

impl QualityFramework {
    /// Built-in domains at the configured default pass threshold, then the
    /// configured domains, which replace built-ins of the same name.
    pub fn new(config: &QualityConfig) -> Self {
        let mut framework = Self {
            domains: BTreeMap::new(),
        };
        for domain in QualityDomainConfig::builtin() {
            framework.register(domain.with_pass_threshold(config.default_pass_threshold));
        }
        for domain in &config.domains {
            framework.register(domain.clone());
        }
        framework
    }

    pub fn register(&mut self, mut domain: QualityDomainConfig) {
        domain.name = domain.name.to_uppercase();
        self.domains.insert(domain.name.clone(), Domain::new(domain));
    }

    pub fn domain(&self, name: &str) -> Option<&QualityDomainConfig> {
        self.lookup(name).map(|d| &d.config)
    }

    pub fn has_domain(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn domain_names(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    fn lookup(&self, name: &str) -> Option<&Domain> {
        self.domains.get(&name.to_uppercase())
    }

    /// Score `payload` against `domain`.
    ///
    /// Unknown domains fall back to `GENERIC`; the result then carries an
    /// `info` issue and `domain_fallback: true` in its metadata.
    pub fn validate(&self, domain: &str, payload: &Value) -> QualityResult {
        let mut issues = Vec::new();
        let mut metadata = Map::new();
        metadata.insert("requested_domain".into(), Value::from(domain));

        let (resolved, fallback) = match self.lookup(domain) {
            Some(found) => (found, false),
            None => match self.lookup(GENERIC_DOMAIN) {
                Some(generic) => {
                    issues.push(QualityIssue::new(
                        Severity::Info,
                        "domain",
                        format!(
                            "unknown quality domain {domain}, validated against {GENERIC_DOMAIN}"
                        ),
                    ));
                    (generic, true)
                }
                None => {
                    return QualityResult {
                        passed: false,
                        score: 0.0,
                        issues: vec![QualityIssue::new(
                            Severity::Critical,
                            "domain",
                            format!("no quality domain available for {domain}"),
                        )],
                        metadata,
                    };
                }
            },
        };

        let config = &resolved.config;
        metadata.insert("domain".into(), Value::from(config.name.clone()));
        metadata.insert("domain_fallback".into(), Value::Bool(fallback));
        metadata.insert("pass_threshold".into(), Value::from(config.pass_threshold));

        let mut observed = Map::new();
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut skipped_optional = 0;
        for (name, threshold) in &config.metrics {
            let Some(value) = extract_metric(payload, name, resolved.patterns.get(name)) else {
                if threshold.required {
                    issues.push(QualityIssue::new(
                        Severity::Critical,
                        name,
                        "metric missing from result",
                    ));
                    total_weight += threshold.weight;
                } else {
                    issues.push(QualityIssue::new(
                        Severity::Info,
                        name,
                        "optional metric missing, excluded from score",
                    ));
                    skipped_optional += 1;
                }
                continue;
            };
            observed.insert(name.clone(), Value::from(value));

            if value < threshold.minimum {
                issues.push(QualityIssue::new(
                    Severity::Error,
                    name,
                    format!("{value} is below minimum {}", threshold.minimum),
                ));
            } else if let Some(max) = threshold.maximum.filter(|max| value > *max) {
                issues.push(QualityIssue::new(
                    Severity::Warning,
                    name,
                    format!("{value} is above maximum {max}"),
                ));
            }
            weighted += threshold.score(value) * threshold.weight;
            total_weight += threshold.weight;
        }

        let score = if config.metrics.len() == skipped_optional {
            1.0
        } else if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
        metadata.insert("metrics".into(), Value::Object(observed));

        let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);
        let passed = score >= config.pass_threshold && !has_critical;

        debug!(
            domain = %config.name,
            score,
            passed,
            issues = issues.len(),
            "quality validation finished"
        );

        QualityResult {
            passed,
            score,
            issues,
            metadata,
        }
    }
}

/// Find a metric value in a result payload.
///
/// Lookup order: `metrics.<name>`, a top-level `<name>` field, then the data
/// and text parts of an agent reply (`{"message": {...}}`) and finally free
/// text matched by `pattern`. Numeric strings are accepted; a trailing `%`
/// divides by 100. Non-finite values count as missing.
pub fn extract_metric(payload: &Value, name: &str, pattern: Option<&Regex>) -> Option<f64> {
    match payload {
        Value::Object(map) => {
            let structured = map
                .get("metrics")
                .and_then(|m| m.get(name))
                .or_else(|| map.get(name));
            if let Some(value) = structured {
                return numeric(value);
            }

            let message = map
                .get("message")
                .and_then(|m| serde_json::from_value::<Message>(m.clone()).ok())?;
            message
                .parts
                .iter()
                .filter_map(Part::as_data)
                .find_map(|data| extract_metric(data, name, None))
                .or_else(|| {
                    let text = message.joined_text();
                    pattern.and_then(|re| from_text(&text, re))
                })
        }
        Value::String(text) => pattern.and_then(|re| from_text(text, re)),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok().map(|v| v / 100.0),
                None => s.parse::<f64>().ok(),
            }
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn from_text(text: &str, pattern: &Regex) -> Option<f64> {
    let captures = pattern.captures(text)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    let value = if captures.get(2).is_some() {
        value / 100.0
    } else {
        value
    };
    Some(value).filter(|v| v.is_finite())
}
