use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::catalog::{MetricsError, MetricsSource};
use super::domain::{Campaign, CampaignEvaluationContext, CampaignId, CampaignRule, UsuarioId};
use super::evaluation::{evaluate_campaign, CampaignEvaluationResult};
use super::metrics::CampaignEvaluationMetrics;
use super::snapshot::{
    CampaignProgressSnapshot, SnapshotError, SnapshotMeta, SnapshotStore, SnapshotWrite,
};
use super::summary::{summarize_progress, CampaignProgressSummary};

pub const DEFAULT_CACHE_TTL_SECONDS: i64 = 300;

const MAX_PURGE_AGE_MINUTES: i64 = 1_000_000_000;

/// Time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Supplies the metrics snapshot for one user on a cache miss.
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    async fn fetch(&self) -> Result<CampaignEvaluationMetrics, MetricsError>;
}

/// Request-scoped, single-flight metrics fetch for one user.
///
/// Every campaign evaluated while handling one request shares this value, so the underlying
/// source runs at most once even when several evaluations miss the cache concurrently. A failed
/// fetch is not memoized. Do not keep it across requests; the snapshot cache owns that.
pub struct RequestMetrics<M> {
    source: Arc<M>,
    usuario_id: UsuarioId,
    cell: OnceCell<CampaignEvaluationMetrics>,
}

impl<M> RequestMetrics<M>
where
    M: MetricsSource,
{
    pub fn new(source: Arc<M>, usuario_id: UsuarioId) -> Self {
        Self {
            source,
            usuario_id,
            cell: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

#[async_trait]
impl<M> MetricsFetcher for RequestMetrics<M>
where
    M: MetricsSource,
{
    async fn fetch(&self) -> Result<CampaignEvaluationMetrics, MetricsError> {
        let metrics = self
            .cell
            .get_or_try_init(|| self.source.fetch_campaign_metrics(self.usuario_id))
            .await?;
        Ok(metrics.clone())
    }
}

/// Per-call cache behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Maximum snapshot age; zero or negative disables reuse.
    pub ttl_seconds: i64,
    /// Skip the snapshot read and always recompute.
    pub force: bool,
    /// When set, a snapshot is reused only if it was stored with this fingerprint.
    pub fingerprint: Option<String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            force: false,
            fingerprint: None,
        }
    }
}

impl CacheOptions {
    pub fn with_ttl(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            ..Self::default()
        }
    }

    pub fn is_fresh(&self, snapshot: &CampaignProgressSnapshot, now: DateTime<Utc>) -> bool {
        if self.ttl_seconds <= 0 {
            return false;
        }
        let age_millis = (now - snapshot.evaluated_at).num_milliseconds();
        if age_millis >= self.ttl_seconds.saturating_mul(1000) {
            return false;
        }
        match &self.fingerprint {
            Some(hint) => snapshot.meta.fingerprint.as_deref() == Some(hint.as_str()),
            None => true,
        }
    }
}

pub struct CachedEvaluationRequest<'a> {
    pub campaign: &'a Campaign,
    pub rules: &'a [CampaignRule],
    pub usuario_id: UsuarioId,
    pub context: &'a CampaignEvaluationContext,
    pub options: &'a CacheOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEvaluation {
    pub result: CampaignEvaluationResult,
    pub from_cache: bool,
    /// The snapshot served or written; `None` when the store failed to persist.
    pub snapshot: Option<CampaignProgressSnapshot>,
}

impl CachedEvaluation {
    pub fn snapshot_evaluated_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.as_ref().map(|snapshot| snapshot.evaluated_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub deleted_count: usize,
    pub cutoff_time: DateTime<Utc>,
    pub max_age_minutes: u64,
}

/// Evaluator wrapped with a snapshot read/write keyed by (campaign, usuario).
///
/// Store failures never block evaluation: a failed read is a miss and a failed write is logged
/// and the fresh result is still returned. Metrics fetch failures propagate to the caller.
pub struct CampaignProgressCache<S, C = SystemClock> {
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S> CampaignProgressCache<S, SystemClock>
where
    S: SnapshotStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }
}

impl<S, C> CampaignProgressCache<S, C>
where
    S: SnapshotStore,
    C: Clock,
{
    pub fn with_clock(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    pub async fn evaluate_campaign_cached<F>(
        &self,
        request: CachedEvaluationRequest<'_>,
        fetcher: &F,
    ) -> Result<CachedEvaluation, MetricsError>
    where
        F: MetricsFetcher + ?Sized,
    {
        let CachedEvaluationRequest {
            campaign,
            rules,
            usuario_id,
            context,
            options,
        } = request;

        if !options.force {
            match self.store.latest(&campaign.id, usuario_id) {
                Ok(Some(snapshot)) if options.is_fresh(&snapshot, self.clock.now()) => {
                    return Ok(CachedEvaluation {
                        result: snapshot.to_result(),
                        from_cache: true,
                        snapshot: Some(snapshot),
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        campaign_id = %campaign.id,
                        usuario_id = %usuario_id,
                        error = %err,
                        "snapshot read failed; recomputing"
                    );
                }
            }
        }

        let metrics = fetcher.fetch().await?;
        let result = evaluate_campaign(campaign, rules, &metrics, context);
        let fingerprint = options
            .fingerprint
            .clone()
            .unwrap_or_else(|| metrics.fingerprint());
        let evaluated_at = self.clock.now();

        let write = SnapshotWrite {
            campaign_id: campaign.id.clone(),
            usuario_id,
            eligible: result.eligible,
            progress: result.progress,
            status: result.status,
            metrics,
            meta: SnapshotMeta {
                fingerprint: Some(fingerprint),
                cached_at: Some(evaluated_at),
                rule_results: result.rule_results.clone(),
            },
            evaluated_at,
        };

        let snapshot = match self.store.upsert(write) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(
                    campaign_id = %campaign.id,
                    usuario_id = %usuario_id,
                    error = %err,
                    "snapshot write failed; serving uncached result"
                );
                None
            }
        };

        Ok(CachedEvaluation {
            result,
            from_cache: false,
            snapshot,
        })
    }

    pub fn invalidate(
        &self,
        campaign_id: &CampaignId,
        usuario_id: Option<UsuarioId>,
    ) -> Result<usize, SnapshotError> {
        let removed = self.store.invalidate(campaign_id, usuario_id)?;
        info!(
            campaign_id = %campaign_id,
            usuario_id = ?usuario_id.map(|id| id.0),
            removed,
            "campaign progress invalidated"
        );
        Ok(removed)
    }

    /// Deletes snapshots evaluated more than `max_age_minutes` ago.
    pub fn purge_stale(&self, max_age_minutes: u64) -> Result<PurgeReport, SnapshotError> {
        let minutes = i64::try_from(max_age_minutes)
            .unwrap_or(MAX_PURGE_AGE_MINUTES)
            .min(MAX_PURGE_AGE_MINUTES);
        let cutoff_time = self
            .clock
            .now()
            .checked_sub_signed(Duration::minutes(minutes))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted_count = self.store.purge_evaluated_before(cutoff_time)?;
        info!(
            deleted_count,
            max_age_minutes,
            cutoff = %cutoff_time.to_rfc3339(),
            "stale campaign snapshots purged"
        );
        Ok(PurgeReport {
            deleted_count,
            cutoff_time,
            max_age_minutes,
        })
    }

    pub fn progress_summary(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<CampaignProgressSummary, SnapshotError> {
        let snapshots = self.store.list_for_campaign(campaign_id)?;
        Ok(summarize_progress(campaign_id, &snapshots))
    }
}
