//! Campaign eligibility and goal progress for portal users.
//!
//! Rules are evaluated against a metrics snapshot fetched once per request; results are cached
//! per (campaign, usuario) with a TTL so dashboards do not rerun the aggregation queries.

pub mod cache;
pub mod catalog;
pub mod datasets;
pub mod describe;
pub mod domain;
pub mod evaluation;
pub mod metrics;
pub mod router;
pub mod service;
pub mod snapshot;
pub mod summary;
pub mod visibility;

#[cfg(test)]
mod tests;

pub use cache::{
    CacheOptions, CachedEvaluation, CachedEvaluationRequest, CampaignProgressCache, Clock,
    MetricsFetcher, PurgeReport, RequestMetrics, SystemClock, DEFAULT_CACHE_TTL_SECONDS,
};
pub use catalog::{CampaignCatalog, CatalogError, MetricsError, MetricsSource};
pub use datasets::{
    dataset_definition, dataset_field, definitions_for_scope, is_dataset_key, validate_rule,
    validate_rules, DatasetDefinition, DatasetField, FieldType, RuleValidationIssue,
};
pub use describe::{describe_rule, RuleSummary};
pub use domain::{
    ActiveRange, Campaign, CampaignEvaluationContext, CampaignId, CampaignReward, CampaignRule,
    CampaignSegmentLink, CampaignStatus, RuleKind, RuleScope, Segment, UsuarioId, UsuarioSesion,
};
pub use evaluation::{
    evaluate_campaign, CampaignEvaluationResult, CampaignProgressStatus, MetricOperator,
    RuleConfig, RuleConfigError, RuleResult, ValueType,
};
pub use metrics::{CampaignEvaluationMetrics, MetricGroup, MetricValue};
pub use router::campaign_router;
pub use service::{
    CacheInfo, CampaignDetailResponse, CampaignListItem, CampaignListResponse, CampaignQuery,
    CampaignService, CampaignServiceError,
};
pub use snapshot::{
    CampaignProgressSnapshot, SnapshotError, SnapshotMeta, SnapshotStore, SnapshotWrite,
};
pub use summary::{summarize_progress, CampaignProgressSummary, ProgressCounts};
pub use visibility::CampaignSegmentsMeta;
