use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{CampaignId, UsuarioId};
use super::evaluation::{CampaignEvaluationResult, CampaignProgressStatus, RuleResult};
use super::metrics::CampaignEvaluationMetrics;

/// Bookkeeping stored next to the metrics so a cache hit can rebuild the full result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub cached_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "ruleResults")]
    pub rule_results: Vec<RuleResult>,
}

/// Last evaluation persisted for one (campaign, usuario) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignProgressSnapshot {
    pub id: String,
    pub campaign_id: CampaignId,
    pub usuario_id: UsuarioId,
    pub eligible: bool,
    pub progress: f64,
    pub status: CampaignProgressStatus,
    #[serde(default)]
    pub metrics: Option<CampaignEvaluationMetrics>,
    #[serde(default)]
    pub meta: SnapshotMeta,
    pub evaluated_at: DateTime<Utc>,
}

impl CampaignProgressSnapshot {
    pub fn to_result(&self) -> CampaignEvaluationResult {
        CampaignEvaluationResult {
            eligible: self.eligible,
            progress: self.progress,
            status: self.status,
            metrics: self.metrics.clone().unwrap_or_default(),
            rule_results: self.meta.rule_results.clone(),
        }
    }
}

/// Values written on a cache miss; the store assigns or keeps the record id.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotWrite {
    pub campaign_id: CampaignId,
    pub usuario_id: UsuarioId,
    pub eligible: bool,
    pub progress: f64,
    pub status: CampaignProgressStatus,
    pub metrics: CampaignEvaluationMetrics,
    pub meta: SnapshotMeta,
    pub evaluated_at: DateTime<Utc>,
}

impl SnapshotWrite {
    pub fn into_snapshot(self, id: String) -> CampaignProgressSnapshot {
        CampaignProgressSnapshot {
            id,
            campaign_id: self.campaign_id,
            usuario_id: self.usuario_id,
            eligible: self.eligible,
            progress: self.progress,
            status: self.status,
            metrics: Some(self.metrics),
            meta: self.meta,
            evaluated_at: self.evaluated_at,
        }
    }
}

/// Persistence for progress snapshots keyed by (campaign, usuario). Writes are last-write-wins.
pub trait SnapshotStore: Send + Sync {
    fn latest(
        &self,
        campaign_id: &CampaignId,
        usuario_id: UsuarioId,
    ) -> Result<Option<CampaignProgressSnapshot>, SnapshotError>;
    fn upsert(&self, write: SnapshotWrite) -> Result<CampaignProgressSnapshot, SnapshotError>;
    /// Deletes the campaign's snapshots, or only one user's when `usuario_id` is set.
    fn invalidate(
        &self,
        campaign_id: &CampaignId,
        usuario_id: Option<UsuarioId>,
    ) -> Result<usize, SnapshotError>;
    fn purge_evaluated_before(&self, cutoff: DateTime<Utc>) -> Result<usize, SnapshotError>;
    fn list_for_campaign(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<CampaignProgressSnapshot>, SnapshotError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}
