use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use super::config::{
    CustomSqlCondition, IndexThresholdCondition, MetricCondition, NumericBounds, NumericCondition,
    RoleCondition, RuleCondition, RuleConfig, SegmentCondition, SegmentMatch,
};
use super::operators::apply_operator;
use super::RuleResult;
use crate::campaigns::datasets::dataset_definition;
use crate::campaigns::domain::{normalize_role, CampaignEvaluationContext, CampaignRule};
use crate::campaigns::metrics::{CampaignEvaluationMetrics, MetricGroup, MetricValue};

/// Evaluation context with role and segment sets normalized once per campaign.
#[derive(Debug, Clone, Default)]
pub(crate) struct RuleContext {
    role: Option<String>,
    segment_ids: BTreeSet<String>,
    segment_slugs: BTreeSet<String>,
}

impl RuleContext {
    pub(crate) fn new(context: &CampaignEvaluationContext) -> Self {
        Self {
            role: context.usuario_rol.as_deref().and_then(normalize_role),
            segment_ids: context
                .segment_ids
                .iter()
                .map(|id| SegmentMatch::Id.normalize(id))
                .filter(|id| !id.is_empty())
                .collect(),
            segment_slugs: context
                .segment_slugs
                .iter()
                .map(|slug| SegmentMatch::Slug.normalize(slug))
                .filter(|slug| !slug.is_empty())
                .collect(),
        }
    }
}

struct Outcome {
    passed: bool,
    details: Map<String, Value>,
}

/// Evaluates a single rule. Never panics: undecodable configs fail closed with a reason code.
pub(crate) fn evaluate_rule(
    rule: &CampaignRule,
    metrics: &CampaignEvaluationMetrics,
    context: &RuleContext,
) -> RuleResult {
    let config = match RuleConfig::decode(&rule.rule_kind, &rule.config) {
        Ok(config) => config,
        Err(err) => {
            let mut details = Map::new();
            details.insert("reason".to_string(), json!(err.reason()));
            details.insert("error".to_string(), json!(err.to_string()));
            return RuleResult::from_rule(rule, false, None, details);
        }
    };

    let Outcome {
        passed,
        mut details,
    } = match &config.condition {
        RuleCondition::Role(role) => evaluate_role(role, context),
        RuleCondition::Segment(segment) => evaluate_segment(segment, context),
        RuleCondition::CountPolicies(numeric) | RuleCondition::TotalPremium(numeric) => {
            evaluate_counter(numeric, &metrics.polizas)
        }
        RuleCondition::RcCount(numeric) => evaluate_counter(numeric, &metrics.rc),
        RuleCondition::IndexThreshold(index) => evaluate_index(index, metrics),
        RuleCondition::TenureMonths(numeric) => {
            check_numeric(metrics.tenure_meses, &numeric.bounds, &numeric.field, None)
        }
        RuleCondition::MetricCondition(condition) => evaluate_metric_condition(condition, metrics),
        RuleCondition::CustomSql(custom) => evaluate_custom(custom),
    };

    let passed = if config.negate {
        details.insert("negated".to_string(), Value::Bool(true));
        !passed
    } else {
        passed
    };

    RuleResult::from_rule(rule, passed, config.weight, details)
}

fn evaluate_role(role: &RoleCondition, context: &RuleContext) -> Outcome {
    let restricted = !role.allow.is_empty() || !role.deny.is_empty();
    let passed = match (&context.role, restricted) {
        (_, false) => true,
        (None, true) => false,
        (Some(current), true) => {
            (role.allow.is_empty() || role.allow.contains(current))
                && !role.deny.contains(current)
        }
    };

    let mut details = Map::new();
    details.insert("usuarioRol".to_string(), json!(context.role));
    details.insert("allowed".to_string(), json!(role.allow));
    details.insert("denied".to_string(), json!(role.deny));
    Outcome { passed, details }
}

fn evaluate_segment(segment: &SegmentCondition, context: &RuleContext) -> Outcome {
    let targets = match segment.match_by {
        SegmentMatch::Id => &context.segment_ids,
        SegmentMatch::Slug => &context.segment_slugs,
    };

    let passed = segment
        .require_all
        .iter()
        .all(|value| targets.contains(value))
        && (segment.require_any.is_empty()
            || segment.require_any.iter().any(|value| targets.contains(value)))
        && !segment.exclude.iter().any(|value| targets.contains(value));

    let mut details = Map::new();
    details.insert("matchBy".to_string(), json!(segment.match_by.as_str()));
    details.insert("segmentIds".to_string(), json!(context.segment_ids));
    details.insert("segmentSlugs".to_string(), json!(context.segment_slugs));
    details.insert("requireAll".to_string(), json!(segment.require_all));
    details.insert("requireAny".to_string(), json!(segment.require_any));
    details.insert("exclude".to_string(), json!(segment.exclude));
    Outcome { passed, details }
}

/// Counters default to zero when the metric is absent.
fn evaluate_counter(numeric: &NumericCondition, group: &MetricGroup) -> Outcome {
    let value = group
        .get(&numeric.field)
        .and_then(MetricValue::as_number)
        .unwrap_or(0.0);
    check_numeric(Some(value), &numeric.bounds, &numeric.field, None)
}

fn evaluate_index(index: &IndexThresholdCondition, metrics: &CampaignEvaluationMetrics) -> Outcome {
    let mut passed_all = true;
    let mut entries = Vec::with_capacity(index.checks.len());

    for check in &index.checks {
        let value = metrics
            .builtin_group(check.source.as_str())
            .and_then(|group| group.get(&check.field))
            .and_then(MetricValue::as_number);
        let Outcome { passed, mut details } =
            check_numeric(value, &check.bounds, &check.field, Some(check.source.as_str()));
        if let Some(name) = &check.name {
            details.insert("name".to_string(), json!(name));
        }
        passed_all &= passed;
        entries.push(details);
    }

    if index.grouped {
        let mut details = Map::new();
        details.insert(
            "indices".to_string(),
            Value::Array(entries.into_iter().map(Value::Object).collect()),
        );
        return Outcome {
            passed: passed_all,
            details,
        };
    }

    Outcome {
        passed: passed_all,
        details: entries.into_iter().next().unwrap_or_default(),
    }
}

fn check_numeric(
    value: Option<f64>,
    bounds: &NumericBounds,
    field: &str,
    source: Option<&str>,
) -> Outcome {
    let mut details = Map::new();
    details.insert("value".to_string(), json!(value));
    details.insert("field".to_string(), json!(field));
    if let Some(source) = source {
        details.insert("source".to_string(), json!(source));
    }

    let passed = bounds.admits(value);
    if !bounds.is_unconstrained() {
        details.insert("min".to_string(), json!(bounds.min));
        details.insert("max".to_string(), json!(bounds.max));
        details.insert("gt".to_string(), json!(bounds.gt));
        details.insert("lt".to_string(), json!(bounds.lt));
        details.insert("eq".to_string(), json!(bounds.eq));
    }
    Outcome { passed, details }
}

fn evaluate_metric_condition(
    condition: &MetricCondition,
    metrics: &CampaignEvaluationMetrics,
) -> Outcome {
    let actual = resolve_condition_value(condition, metrics);
    let outcome = apply_operator(
        actual.as_ref(),
        condition.operator,
        &condition.expected,
        condition.value_type,
    );

    let mut details = outcome.details;
    details.insert("dataset".to_string(), json!(condition.dataset));
    details.insert("field".to_string(), json!(condition.field));
    details.insert("path".to_string(), json!(condition.path));
    if let Some(key) = &condition.lookup_key {
        details.insert("lookupKey".to_string(), json!(key));
    }
    Outcome {
        passed: outcome.passed,
        details,
    }
}

/// Keyed datasets expose their whole table under `cantidad`; the lookup key then picks the
/// entry. Otherwise an explicit path wins, falling back to the dataset/field pair.
fn resolve_condition_value(
    condition: &MetricCondition,
    metrics: &CampaignEvaluationMetrics,
) -> Option<MetricValue> {
    let keyed = dataset_definition(&condition.dataset)
        .and_then(|definition| definition.lookup)
        .is_some();

    let resolved = if keyed && condition.field == "cantidad" {
        metrics.dataset_table(&condition.dataset)
    } else {
        let by_path = if condition.path.is_empty() {
            None
        } else {
            metrics.resolve_path(&condition.path)
        };
        by_path.or_else(|| metrics.dataset_value(&condition.dataset, &condition.field))
    };

    match (resolved, &condition.lookup_key) {
        (Some(MetricValue::Table(table)), Some(key)) => table.get(key).cloned(),
        (resolved, _) => resolved,
    }
}

fn evaluate_custom(custom: &CustomSqlCondition) -> Outcome {
    let mut details = Map::new();
    details.insert("desired".to_string(), json!(custom.passed));
    details.insert("message".to_string(), json!(custom.message));
    Outcome {
        passed: custom.passed.unwrap_or(false),
        details,
    }
}
