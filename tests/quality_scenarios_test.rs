//! Quality gate scenarios over the shapes agents actually reply with.

use serde_json::json;

use meshwork::domain::models::{
    Message, MetricThreshold, Part, QualityConfig, QualityDomainConfig, ResponseEnvelope, Role,
    Severity,
};
use meshwork::services::{extract_metric, QualityFramework};

fn reply_payload(parts: Vec<Part>) -> serde_json::Value {
    let message = Message::new(Role::Agent, parts);
    let response = ResponseEnvelope::success("r-1", json!({ "message": message }));
    response.result.unwrap()
}

#[test]
fn test_business_passing_scenario() {
    let result = QualityFramework::default().validate(
        "BUSINESS",
        &json!({"confidence_score": 0.9, "risk_tolerance": 0.7}),
    );
    assert!(result.passed);
    assert!((result.score - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_business_failing_scenario() {
    let result = QualityFramework::default().validate(
        "BUSINESS",
        &json!({"confidence_score": 0.5, "risk_tolerance": 0.9}),
    );
    assert!(!result.passed);
    assert_eq!(result.count(Severity::Error) + result.count(Severity::Warning), 2);
    assert!(!result.has_critical());
}

#[test]
fn test_text_only_reply_is_scored() {
    let payload = reply_payload(vec![Part::text(
        "Literature review complete.\nResearch confidence: 0.86\nEvidence quality = 72%",
    )]);
    let result = QualityFramework::default().validate("academic", &payload);
    assert!(result.passed, "{}", result.summary(Severity::Info));
    assert_eq!(result.metadata["metrics"]["evidence_quality"], json!(0.72));
}

#[test]
fn test_structured_part_wins_over_text() {
    let payload = reply_payload(vec![
        Part::text("uptime: 0.5"),
        Part::data(json!({"uptime": 0.999, "reliability": 0.97})),
    ]);
    assert_eq!(extract_metric(&payload, "uptime", None), Some(0.999));
    assert!(QualityFramework::default().validate("SERVICE", &payload).passed);
}

#[test]
fn test_missing_metric_is_critical_regardless_of_others() {
    let result = QualityFramework::default().validate(
        "GENERIC",
        &json!({"accuracy": 1.0, "completeness": 1.0}),
    );
    assert!(!result.passed);
    let critical: Vec<_> = result
        .issues
        .iter()
        .filter(|i| i.severity == Severity::Critical)
        .map(|i| i.metric.as_str())
        .collect();
    assert_eq!(critical, vec!["relevance"]);
}

#[test]
fn test_configured_domain_from_quality_config() {
    let config = QualityConfig {
        default_pass_threshold: 0.8,
        domains: vec![QualityDomainConfig::new("legal")
            .with_metric("citation_accuracy", MetricThreshold::at_least(0.95, 2.0))
            .with_metric("clarity", MetricThreshold::between(0.5, 1.0, 0.5))
            .with_pass_threshold(0.9)],
    };
    let framework = QualityFramework::new(&config);

    let strong = framework.validate("Legal", &json!({"citation_accuracy": 0.97, "clarity": 0.8}));
    assert!(strong.passed);

    let weak = framework.validate("LEGAL", &json!({"citation_accuracy": 0.9, "clarity": 0.8}));
    assert!(!weak.passed);
    assert_eq!(weak.count(Severity::Error), 1);
    assert_eq!(weak.metadata["pass_threshold"], json!(0.9));
}
