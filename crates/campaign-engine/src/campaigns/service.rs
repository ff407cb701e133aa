use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::CampaignConfig;

use super::cache::{
    CacheOptions, CachedEvaluation, CachedEvaluationRequest, CampaignProgressCache, Clock,
    PurgeReport, RequestMetrics, SystemClock,
};
use super::catalog::{CampaignCatalog, CatalogError, MetricsError, MetricsSource};
use super::datasets::{
    definitions_for_scope, validate_rules, DatasetDefinition, RuleValidationIssue,
    DATASET_DEFINITIONS,
};
use super::domain::{
    Campaign, CampaignEvaluationContext, CampaignId, CampaignReward, CampaignRule,
    CampaignSegmentLink, CampaignStatus, RuleScope, Segment, UsuarioId, UsuarioSesion,
};
use super::evaluation::CampaignEvaluationResult;
use super::snapshot::{SnapshotError, SnapshotStore};
use super::summary::CampaignProgressSummary;
use super::visibility::{
    build_segments_meta, campaign_matches_segments, collect_segment_ids, CampaignSegmentsMeta,
};

/// Query parameters shared by the list and detail endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignQuery {
    /// Snapshot TTL override; the configured default applies when unset.
    pub ttl_seconds: Option<u64>,
    /// Keep campaigns whose active range has not started (or already ended).
    pub include_upcoming: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub from_cache: bool,
    pub snapshot_evaluated_at: Option<DateTime<Utc>>,
}

impl From<&CachedEvaluation> for CacheInfo {
    fn from(evaluation: &CachedEvaluation) -> Self {
        Self {
            from_cache: evaluation.from_cache,
            snapshot_evaluated_at: evaluation.snapshot_evaluated_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignListItem {
    pub campaign: Campaign,
    pub segments: CampaignSegmentsMeta,
    pub evaluation: CampaignEvaluationResult,
    pub cache: CacheInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignListMeta {
    pub total: usize,
    pub segments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignListResponse {
    pub campaigns: Vec<CampaignListItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<CampaignListMeta>,
}

impl CampaignListResponse {
    fn empty() -> Self {
        Self {
            campaigns: Vec::new(),
            meta: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignDetailResponse {
    pub campaign: Campaign,
    pub segments: CampaignSegmentsMeta,
    pub rewards: Vec<CampaignReward>,
    pub evaluation: CampaignEvaluationResult,
    pub cache: CacheInfo,
}

/// Orchestrates catalog lookups, segment visibility, and cached evaluation for portal users.
pub struct CampaignService<C, S, M, K = SystemClock> {
    catalog: Arc<C>,
    metrics: Arc<M>,
    cache: CampaignProgressCache<S, K>,
    clock: Arc<K>,
    config: CampaignConfig,
}

impl<C, S, M> CampaignService<C, S, M, SystemClock>
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
{
    pub fn new(catalog: Arc<C>, store: Arc<S>, metrics: Arc<M>, config: CampaignConfig) -> Self {
        Self::with_clock(catalog, store, metrics, Arc::new(SystemClock), config)
    }
}

impl<C, S, M, K> CampaignService<C, S, M, K>
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    pub fn with_clock(
        catalog: Arc<C>,
        store: Arc<S>,
        metrics: Arc<M>,
        clock: Arc<K>,
        config: CampaignConfig,
    ) -> Self {
        Self {
            catalog,
            metrics,
            cache: CampaignProgressCache::with_clock(store, clock.clone()),
            clock,
            config,
        }
    }

    pub fn cache(&self) -> &CampaignProgressCache<S, K> {
        &self.cache
    }

    /// Resolves the session user. Unknown ids are treated the same as a missing session.
    pub fn resolve_user(
        &self,
        usuario_id: Option<UsuarioId>,
    ) -> Result<UsuarioSesion, CampaignServiceError> {
        let usuario_id = usuario_id.ok_or(CampaignServiceError::Unauthenticated)?;
        let user = self
            .catalog
            .fetch_user(usuario_id)?
            .ok_or(CampaignServiceError::Unauthenticated)?;
        if !user.activo {
            return Err(CampaignServiceError::Inactive);
        }
        Ok(user)
    }

    pub fn require_admin(&self, user: &UsuarioSesion) -> Result<(), CampaignServiceError> {
        if user.is_admin() {
            Ok(())
        } else {
            Err(CampaignServiceError::Forbidden)
        }
    }

    /// Every active campaign visible to `user`, each evaluated through the snapshot cache.
    ///
    /// All evaluations share one request-scoped metrics fetch.
    pub async fn list_for_user(
        &self,
        user: &UsuarioSesion,
        query: &CampaignQuery,
    ) -> Result<CampaignListResponse, CampaignServiceError> {
        let user_segment_ids = self.catalog.fetch_user_segment_ids(user.id)?;
        let campaigns = self
            .catalog
            .fetch_campaigns(Some(CampaignStatus::Active))?;
        if campaigns.is_empty() {
            return Ok(CampaignListResponse::empty());
        }

        let campaign_ids: Vec<CampaignId> =
            campaigns.iter().map(|campaign| campaign.id.clone()).collect();
        let links = self.catalog.fetch_campaign_segments_map(&campaign_ids)?;
        let rules_map = self.catalog.fetch_campaign_rules_map(&campaign_ids)?;

        let segment_set: BTreeSet<String> = user_segment_ids.iter().cloned().collect();
        let now = self.clock.now();
        let visible: Vec<Campaign> = campaigns
            .into_iter()
            .filter(|campaign| query.include_upcoming || campaign.is_active(now))
            .filter(|campaign| campaign_matches_segments(campaign, &segment_set, &links))
            .collect();
        if visible.is_empty() {
            return Ok(CampaignListResponse::empty());
        }

        let segment_map = self.segment_catalog(&visible, &links)?;
        let context = evaluation_context(user, user_segment_ids);
        let options = self.cache_options(query);
        let fetcher = RequestMetrics::new(self.metrics.clone(), user.id);

        let mut items = Vec::with_capacity(visible.len());
        for campaign in visible {
            let rules = rules_for(&rules_map, &campaign.id);
            let evaluation = self
                .cache
                .evaluate_campaign_cached(
                    CachedEvaluationRequest {
                        campaign: &campaign,
                        rules,
                        usuario_id: user.id,
                        context: &context,
                        options: &options,
                    },
                    &fetcher,
                )
                .await?;
            let segments = build_segments_meta(&campaign, &links, &segment_map);
            items.push(CampaignListItem {
                cache: CacheInfo::from(&evaluation),
                evaluation: evaluation.result,
                segments,
                campaign,
            });
        }

        let meta = CampaignListMeta {
            total: items.len(),
            segments: segment_map.len(),
        };
        Ok(CampaignListResponse {
            campaigns: items,
            meta: Some(meta),
        })
    }

    pub async fn detail_for_user(
        &self,
        user: &UsuarioSesion,
        slug: &str,
        query: &CampaignQuery,
    ) -> Result<CampaignDetailResponse, CampaignServiceError> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(CampaignServiceError::SlugRequired);
        }

        let user_segment_ids = self.catalog.fetch_user_segment_ids(user.id)?;
        let campaign = self
            .catalog
            .fetch_campaign_by_slug(slug)?
            .ok_or_else(|| CampaignServiceError::NotFound(slug.to_string()))?;
        if campaign.status != CampaignStatus::Active {
            return Err(CampaignServiceError::Unavailable);
        }

        let campaign_ids = [campaign.id.clone()];
        let links = self.catalog.fetch_campaign_segments_map(&campaign_ids)?;
        let rules_map = self.catalog.fetch_campaign_rules_map(&campaign_ids)?;
        let rewards = self.catalog.fetch_campaign_rewards(&campaign.id)?;

        let segment_set: BTreeSet<String> = user_segment_ids.iter().cloned().collect();
        if !campaign_matches_segments(&campaign, &segment_set, &links) {
            return Err(CampaignServiceError::NotVisible);
        }
        if !query.include_upcoming && !campaign.is_active(self.clock.now()) {
            return Err(CampaignServiceError::OutOfRange);
        }

        let segment_map = self.segment_catalog(std::slice::from_ref(&campaign), &links)?;
        let context = evaluation_context(user, user_segment_ids);
        let options = self.cache_options(query);
        let fetcher = RequestMetrics::new(self.metrics.clone(), user.id);

        let evaluation = self
            .cache
            .evaluate_campaign_cached(
                CachedEvaluationRequest {
                    campaign: &campaign,
                    rules: rules_for(&rules_map, &campaign.id),
                    usuario_id: user.id,
                    context: &context,
                    options: &options,
                },
                &fetcher,
            )
            .await?;
        let segments = build_segments_meta(&campaign, &links, &segment_map);

        Ok(CampaignDetailResponse {
            cache: CacheInfo::from(&evaluation),
            evaluation: evaluation.result,
            segments,
            rewards,
            campaign,
        })
    }

    /// Dataset catalogue for the rule editor, optionally narrowed to one scope.
    pub fn datasets(&self, scope: Option<RuleScope>) -> Vec<&'static DatasetDefinition> {
        match scope {
            Some(scope) => definitions_for_scope(scope),
            None => DATASET_DEFINITIONS.iter().collect(),
        }
    }

    pub fn validate_rules(&self, rules: &[CampaignRule]) -> Vec<RuleValidationIssue> {
        validate_rules(rules)
    }

    pub fn progress_summary(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<CampaignProgressSummary, CampaignServiceError> {
        self.require_campaign(campaign_id)?;
        Ok(self.cache.progress_summary(campaign_id)?)
    }

    pub fn invalidate_progress(
        &self,
        campaign_id: &CampaignId,
        usuario_id: Option<UsuarioId>,
    ) -> Result<usize, CampaignServiceError> {
        self.require_campaign(campaign_id)?;
        Ok(self.cache.invalidate(campaign_id, usuario_id)?)
    }

    /// Accepts the request when no secret is configured, or when either credential matches it.
    pub fn authorize_cron(
        &self,
        bearer: Option<&str>,
        token: Option<&str>,
    ) -> Result<(), CampaignServiceError> {
        match self.config.cron_secret.as_deref() {
            None => Ok(()),
            Some(secret) if bearer == Some(secret) || token == Some(secret) => Ok(()),
            Some(_) => Err(CampaignServiceError::Unauthorized),
        }
    }

    pub fn purge_stale_snapshots(
        &self,
        max_age_minutes: Option<u64>,
    ) -> Result<PurgeReport, CampaignServiceError> {
        let max_age = max_age_minutes.unwrap_or(self.config.purge_max_age_minutes);
        Ok(self.cache.purge_stale(max_age)?)
    }

    fn require_campaign(&self, campaign_id: &CampaignId) -> Result<Campaign, CampaignServiceError> {
        self.catalog
            .fetch_campaign_by_id(campaign_id)?
            .ok_or_else(|| CampaignServiceError::NotFound(campaign_id.to_string()))
    }

    fn segment_catalog(
        &self,
        campaigns: &[Campaign],
        links: &BTreeMap<CampaignId, Vec<CampaignSegmentLink>>,
    ) -> Result<HashMap<String, Segment>, CampaignServiceError> {
        let needed: Vec<String> = collect_segment_ids(campaigns, links).into_iter().collect();
        if needed.is_empty() {
            return Ok(HashMap::new());
        }
        let segments = self.catalog.fetch_segments_by_ids(&needed)?;
        Ok(segments
            .into_iter()
            .map(|segment| (segment.id.clone(), segment))
            .collect())
    }

    fn cache_options(&self, query: &CampaignQuery) -> CacheOptions {
        let ttl = query.ttl_seconds.unwrap_or(self.config.cache_ttl_seconds);
        CacheOptions::with_ttl(i64::try_from(ttl).unwrap_or(i64::MAX))
    }
}

fn evaluation_context(user: &UsuarioSesion, segment_ids: Vec<String>) -> CampaignEvaluationContext {
    CampaignEvaluationContext {
        usuario_rol: user.rol.clone(),
        segment_ids,
        segment_slugs: Vec::new(),
    }
}

fn rules_for<'a>(
    rules_map: &'a BTreeMap<CampaignId, Vec<CampaignRule>>,
    campaign_id: &CampaignId,
) -> &'a [CampaignRule] {
    rules_map.get(campaign_id).map(Vec::as_slice).unwrap_or(&[])
}

/// Error raised by the campaign service.
#[derive(Debug, thiserror::Error)]
pub enum CampaignServiceError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("user is inactive")]
    Inactive,
    #[error("admin role required")]
    Forbidden,
    #[error("invalid cron credentials")]
    Unauthorized,
    #[error("campaign slug is required")]
    SlugRequired,
    #[error("invalid query parameter: {0}")]
    InvalidQuery(String),
    #[error("campaign not found: {0}")]
    NotFound(String),
    #[error("campaign not available")]
    Unavailable,
    #[error("campaign outside its active range")]
    OutOfRange,
    #[error("campaign not visible for this user")]
    NotVisible,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl CampaignServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Inactive | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::SlugRequired | Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::Unavailable | Self::NotVisible | Self::OutOfRange => {
                StatusCode::NOT_FOUND
            }
            Self::Catalog(_) | Self::Metrics(_) | Self::Snapshot(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
