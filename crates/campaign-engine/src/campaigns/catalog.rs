use std::collections::BTreeMap;

use async_trait::async_trait;

use super::domain::{
    Campaign, CampaignId, CampaignReward, CampaignRule, CampaignSegmentLink, CampaignStatus,
    Segment, UsuarioId, UsuarioSesion,
};
use super::metrics::CampaignEvaluationMetrics;

/// Read-only lookups against the campaign catalogue and segment membership tables.
pub trait CampaignCatalog: Send + Sync {
    fn fetch_user(&self, id: UsuarioId) -> Result<Option<UsuarioSesion>, CatalogError>;
    fn fetch_campaigns(
        &self,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<Campaign>, CatalogError>;
    fn fetch_campaign_by_slug(&self, slug: &str) -> Result<Option<Campaign>, CatalogError>;
    fn fetch_campaign_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, CatalogError>;
    /// Rules per campaign, ordered by `priority` for display.
    fn fetch_campaign_rules_map(
        &self,
        campaign_ids: &[CampaignId],
    ) -> Result<BTreeMap<CampaignId, Vec<CampaignRule>>, CatalogError>;
    fn fetch_campaign_segments_map(
        &self,
        campaign_ids: &[CampaignId],
    ) -> Result<BTreeMap<CampaignId, Vec<CampaignSegmentLink>>, CatalogError>;
    fn fetch_segments_by_ids(&self, ids: &[String]) -> Result<Vec<Segment>, CatalogError>;
    fn fetch_user_segment_ids(&self, usuario_id: UsuarioId) -> Result<Vec<String>, CatalogError>;
    fn fetch_campaign_rewards(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<CampaignReward>, CatalogError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Aggregates a user's business metrics; typically a set of slow database queries.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_campaign_metrics(
        &self,
        usuario_id: UsuarioId,
    ) -> Result<CampaignEvaluationMetrics, MetricsError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics unavailable for usuario {usuario_id}: {reason}")]
    Unavailable { usuario_id: UsuarioId, reason: String },
}
