//! Human-readable requirement lines for reports and admin listings.

use serde::Serialize;

use super::datasets::{dataset_definition, dataset_field};
use super::domain::CampaignRule;
use super::evaluation::{value_text, NumericBounds, RuleCondition, RuleConfig};
use super::metrics::format_number;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub summary: String,
    /// `Dataset -> Field` descriptors of every metric the rule reads.
    pub variables: Vec<String>,
}

pub fn describe_rule(rule: &CampaignRule) -> RuleSummary {
    let Ok(config) = RuleConfig::decode(&rule.rule_kind, &rule.config) else {
        return RuleSummary {
            summary: format!("{} (configuración inválida)", rule.rule_kind.as_str()),
            variables: Vec::new(),
        };
    };

    let mut described = describe_condition(&config.condition);
    if config.negate {
        described.summary = format!("No cumple: {}", described.summary);
    }
    described
}

fn describe_condition(condition: &RuleCondition) -> RuleSummary {
    match condition {
        RuleCondition::Role(role) => {
            let mut parts = Vec::new();
            if !role.allow.is_empty() {
                parts.push(format!("Roles permitidos: {}", role.allow.join(", ")));
            }
            if !role.deny.is_empty() {
                parts.push(format!("Roles excluidos: {}", role.deny.join(", ")));
            }
            text_only(parts, "Regla de roles")
        }
        RuleCondition::Segment(segment) => {
            let mut parts = Vec::new();
            if !segment.require_all.is_empty() {
                parts.push(format!(
                    "Incluye todos los segmentos: {}",
                    segment.require_all.join(", ")
                ));
            }
            if !segment.require_any.is_empty() {
                parts.push(format!(
                    "Incluye segmentos: {}",
                    segment.require_any.join(", ")
                ));
            }
            if !segment.exclude.is_empty() {
                parts.push(format!("Excluye segmentos: {}", segment.exclude.join(", ")));
            }
            text_only(parts, "Regla de segmentos")
        }
        RuleCondition::CountPolicies(numeric) | RuleCondition::TotalPremium(numeric) => {
            metric_bounds("polizas", &polizas_field(&numeric.field), &numeric.bounds)
        }
        RuleCondition::RcCount(numeric) => metric_bounds("rc", &numeric.field, &numeric.bounds),
        RuleCondition::TenureMonths(numeric) => {
            metric_bounds("tenure", "tenure_meses", &numeric.bounds)
        }
        RuleCondition::IndexThreshold(index) => {
            let described: Vec<RuleSummary> = index
                .checks
                .iter()
                .map(|check| metric_bounds(check.source.as_str(), &check.field, &check.bounds))
                .collect();
            let summary = described
                .iter()
                .map(|entry| entry.summary.as_str())
                .collect::<Vec<_>>()
                .join(" | ");
            let mut variables = Vec::new();
            for variable in described.into_iter().flat_map(|entry| entry.variables) {
                if !variables.contains(&variable) {
                    variables.push(variable);
                }
            }
            RuleSummary { summary, variables }
        }
        RuleCondition::MetricCondition(metric) => {
            let (dataset_label, field_label) = labels(&metric.dataset, &metric.field);
            let expected = match metric.expected.as_f64() {
                Some(number) => format_number(number),
                None => value_text(&metric.expected),
            };
            RuleSummary {
                summary: format!(
                    "{dataset_label} - {field_label} {} {expected}",
                    metric.operator.symbol()
                ),
                variables: vec![format!("{dataset_label} -> {field_label}")],
            }
        }
        RuleCondition::CustomSql(custom) => RuleSummary {
            summary: custom
                .message
                .clone()
                .unwrap_or_else(|| "Condición externa precalculada".to_string()),
            variables: Vec::new(),
        },
    }
}

fn text_only(parts: Vec<String>, fallback: &str) -> RuleSummary {
    let summary = if parts.is_empty() {
        fallback.to_string()
    } else {
        parts.join(" | ")
    };
    RuleSummary {
        summary,
        variables: Vec::new(),
    }
}

fn metric_bounds(dataset: &str, field: &str, bounds: &NumericBounds) -> RuleSummary {
    let (dataset_label, field_label) = labels(dataset, field);
    RuleSummary {
        summary: format!("{field_label} {}", bounds_text(bounds)),
        variables: vec![format!("{dataset_label} -> {field_label}")],
    }
}

/// Registry labels when the dataset and field are known, raw keys otherwise.
fn labels(dataset: &str, field: &str) -> (String, String) {
    let dataset_label = dataset_definition(dataset)
        .map(|definition| definition.label.to_string())
        .unwrap_or_else(|| dataset.to_string());
    let field_label = dataset_field(dataset, field)
        .map(|definition| definition.label.to_string())
        .unwrap_or_else(|| field.to_string());
    (dataset_label, field_label)
}

// Counter fields live under `polizas` without the registry's `polizas_` prefix.
fn polizas_field(field: &str) -> String {
    match field {
        "total" | "vigentes" | "anuladas" => format!("polizas_{field}"),
        other => other.to_string(),
    }
}

fn bounds_text(bounds: &NumericBounds) -> String {
    let parts: Vec<String> = [
        (">=", bounds.min),
        ("<=", bounds.max),
        (">", bounds.gt),
        ("<", bounds.lt),
        ("=", bounds.eq),
    ]
    .into_iter()
    .filter_map(|(symbol, bound)| bound.map(|value| format!("{symbol} {}", format_number(value))))
    .collect();

    if parts.is_empty() {
        "sin condición".to_string()
    } else {
        parts.join(" y ")
    }
}
