//! Pure rule evaluation: a campaign's rules against one metrics snapshot.

mod config;
mod operators;
mod rules;

pub use config::{
    CustomSqlCondition, IndexCheck, IndexThresholdCondition, MetricCondition, MetricSource,
    NumericBounds, NumericCondition, RoleCondition, RuleCondition, RuleConfig, RuleConfigError,
    SegmentCondition, SegmentMatch,
};
pub use operators::{apply_operator, MetricOperator, OperatorOutcome, ValueType};

pub(crate) use config::value_text;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::domain::{
    Campaign, CampaignEvaluationContext, CampaignRule, RuleKind, RuleScope,
};
use super::metrics::CampaignEvaluationMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignProgressStatus {
    NotEligible,
    Eligible,
    Completed,
}

impl CampaignProgressStatus {
    pub fn classify(eligible: bool, progress: f64) -> Self {
        if !eligible {
            Self::NotEligible
        } else if progress >= 1.0 {
            Self::Completed
        } else {
            Self::Eligible
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotEligible => "not_eligible",
            Self::Eligible => "eligible",
            Self::Completed => "completed",
        }
    }
}

/// Outcome of one rule, kept in the evaluation result for traceability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub id: String,
    pub passed: bool,
    pub scope: RuleScope,
    pub kind: RuleKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl RuleResult {
    fn from_rule(
        rule: &CampaignRule,
        passed: bool,
        weight: Option<f64>,
        details: Map<String, Value>,
    ) -> Self {
        Self {
            id: rule.id.clone(),
            passed,
            scope: rule.scope,
            kind: rule.rule_kind.clone(),
            description: rule.description.clone(),
            weight,
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignEvaluationResult {
    pub eligible: bool,
    pub progress: f64,
    pub status: CampaignProgressStatus,
    pub metrics: CampaignEvaluationMetrics,
    pub rule_results: Vec<RuleResult>,
}

const MAX_PARTIAL_PROGRESS: f64 = 0.999;

/// Evaluates `rules` against `metrics`.
///
/// Eligibility is the conjunction of every eligibility rule (vacuously true), progress is the
/// share of goal rules that passed (1 when there are none) rounded to three decimals, and rule
/// results come back in input order.
pub fn evaluate_campaign(
    campaign: &Campaign,
    rules: &[CampaignRule],
    metrics: &CampaignEvaluationMetrics,
    context: &CampaignEvaluationContext,
) -> CampaignEvaluationResult {
    let context = rules::RuleContext::new(context);
    let rule_results: Vec<RuleResult> = rules
        .iter()
        .map(|rule| rules::evaluate_rule(rule, metrics, &context))
        .collect();

    let eligible = rule_results
        .iter()
        .filter(|result| result.scope == RuleScope::Eligibility)
        .all(|result| result.passed);

    let (goal_total, goal_passed) = rule_results
        .iter()
        .filter(|result| result.scope == RuleScope::Goal)
        .fold((0_usize, 0_usize), |(total, passed), result| {
            (total + 1, passed + usize::from(result.passed))
        });
    let progress = if goal_total == 0 {
        1.0
    } else {
        round_progress(goal_passed, goal_total)
    };

    let status = CampaignProgressStatus::classify(eligible, progress);
    debug!(
        campaign_id = %campaign.id,
        status = status.as_str(),
        progress,
        rules = rule_results.len(),
        "campaign evaluated"
    );

    CampaignEvaluationResult {
        eligible,
        progress,
        status,
        metrics: metrics.clone(),
        rule_results,
    }
}

/// Three-decimal share of passed goals. Stays below 1 while any goal is failing.
fn round_progress(passed: usize, total: usize) -> f64 {
    let rounded = ((passed as f64 / total as f64) * 1000.0).round() / 1000.0;
    if passed < total {
        rounded.clamp(0.0, MAX_PARTIAL_PROGRESS)
    } else {
        1.0
    }
}
