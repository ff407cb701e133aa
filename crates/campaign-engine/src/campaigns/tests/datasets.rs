use super::common::*;
use serde_json::json;

use crate::campaigns::datasets::{
    dataset_definition, dataset_field, definitions_for_scope, is_dataset_key, validate_rule,
    validate_rules, FieldType, DATASET_DEFINITIONS,
};
use crate::campaigns::domain::RuleScope;

fn issue_fields(rule: &crate::campaigns::domain::CampaignRule) -> Vec<&'static str> {
    validate_rule(rule).into_iter().map(|issue| issue.field).collect()
}

#[test]
fn registry_keys_are_unique_and_fields_resolve() {
    let mut keys: Vec<&str> = DATASET_DEFINITIONS
        .iter()
        .map(|definition| definition.key)
        .collect();
    let total = keys.len();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), total);

    assert!(is_dataset_key("ranking_r1"));
    assert!(!is_dataset_key("ranking_r9"));
    let field = dataset_field("ranking_r1", "estatus").expect("registered field");
    assert_eq!(field.field_type, FieldType::Text);
    assert_eq!(field.path, &["datasets", "ranking_r1", "estatus"]);
    assert!(dataset_definition("polizas_prima_minima")
        .and_then(|definition| definition.lookup)
        .is_some());
}

#[test]
fn scope_filter_only_returns_allowed_datasets() {
    let eligibility = definitions_for_scope(RuleScope::Eligibility);
    assert!(eligibility.iter().any(|definition| definition.key == "candidatos"));
    assert!(eligibility.iter().all(|definition| definition.allows_scope(RuleScope::Eligibility)));

    let goals = definitions_for_scope(RuleScope::Goal);
    assert!(goals.iter().all(|definition| definition.key != "candidatos"));
}

#[test]
fn well_formed_rules_have_no_issues() {
    let rules = vec![
        goal(
            "g1",
            "METRIC_CONDITION",
            json!({"dataset": "ranking_r1", "field": "posicion", "operator": "lte", "value": 5}),
        ),
        goal(
            "g2",
            "METRIC_CONDITION",
            json!({"dataset": "ranking_r1", "field": "estatus", "operator": "eq", "value": "oro", "valueType": "text"}),
        ),
        goal(
            "g3",
            "METRIC_CONDITION",
            json!({"dataset": "polizas", "field": "polizas_vigentes", "operator": "in", "value": "3, 4"}),
        ),
        eligibility("r1", "ROLE", json!({"allow": ["agente"]})),
    ];
    assert!(validate_rules(&rules).is_empty());
}

#[test]
fn unknown_fields_are_reported() {
    let rule = goal(
        "g1",
        "METRIC_CONDITION",
        json!({"dataset": "ranking_r1", "field": "nivel", "operator": "eq", "value": 1}),
    );
    let issues = validate_rule(&rule);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].field, "field");
    assert_eq!(issues[0].rule_id, "g1");
    assert!(issues[0].message.contains("posicion"));
}

#[test]
fn scope_restrictions_are_enforced() {
    let rule = goal(
        "g1",
        "METRIC_CONDITION",
        json!({"dataset": "candidatos", "field": "activos", "operator": "gte", "value": 1}),
    );
    assert_eq!(issue_fields(&rule), vec!["dataset"]);
}

#[test]
fn operators_must_suit_the_value_type() {
    let text_on_number = goal(
        "g1",
        "METRIC_CONDITION",
        json!({"dataset": "ranking_r1", "field": "posicion", "operator": "contains", "value": 1}),
    );
    assert_eq!(issue_fields(&text_on_number), vec!["operator"]);

    let mismatched = goal(
        "g2",
        "METRIC_CONDITION",
        json!({"dataset": "ranking_r1", "field": "estatus", "operator": "gt", "value": "oro", "valueType": "number"}),
    );
    assert_eq!(issue_fields(&mismatched), vec!["valueType", "operator"]);
}

#[test]
fn numeric_expectations_must_parse() {
    let rule = goal(
        "g1",
        "METRIC_CONDITION",
        json!({"dataset": "ranking_r1", "field": "posicion", "operator": "in", "value": "1, dos"}),
    );
    assert_eq!(issue_fields(&rule), vec!["value"]);

    let missing = goal(
        "g2",
        "METRIC_CONDITION",
        json!({"dataset": "ranking_r1", "field": "posicion", "operator": "gte"}),
    );
    assert_eq!(issue_fields(&missing), vec!["value"]);
}

#[test]
fn text_in_requires_candidates() {
    let rule = goal(
        "g1",
        "METRIC_CONDITION",
        json!({"dataset": "ranking_r1", "field": "estatus", "operator": "in", "value": ""}),
    );
    assert_eq!(issue_fields(&rule), vec!["value"]);

    let eq_empty = goal(
        "g2",
        "METRIC_CONDITION",
        json!({"dataset": "ranking_r1", "field": "estatus", "operator": "eq", "value": ""}),
    );
    assert!(validate_rule(&eq_empty).is_empty());
}

#[test]
fn custom_bags_are_allowed_but_foreign_paths_are_not() {
    let custom = goal(
        "g1",
        "METRIC_CONDITION",
        json!({"dataset": "bono_especial", "field": "nivel", "operator": "gte", "value": 2}),
    );
    assert!(validate_rule(&custom).is_empty());

    let foreign = goal(
        "g2",
        "METRIC_CONDITION",
        json!({"dataset": "bono_especial", "field": "nivel", "operator": "gte", "value": 2, "path": "polizas.total"}),
    );
    assert_eq!(issue_fields(&foreign), vec!["dataset"]);
}

#[test]
fn undecodable_configs_are_reported_once() {
    let unsupported = eligibility("r1", "LEGACY_SCORE", json!({}));
    assert_eq!(issue_fields(&unsupported), vec!["config"]);

    let no_operator = goal(
        "g1",
        "METRIC_CONDITION",
        json!({"dataset": "ranking_r1", "field": "posicion", "operator": "between"}),
    );
    let issues = validate_rule(&no_operator);
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.contains("between"));
}
