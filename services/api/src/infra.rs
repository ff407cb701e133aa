use async_trait::async_trait;
use campaign_engine::campaigns::{
    Campaign, CampaignCatalog, CampaignEvaluationMetrics, CampaignId, CampaignProgressSnapshot,
    CampaignReward, CampaignRule, CampaignSegmentLink, CampaignService, CampaignStatus,
    CatalogError, MetricsError, MetricsSource, Segment, SnapshotError, SnapshotStore,
    SnapshotWrite, UsuarioId, UsuarioSesion,
};
use campaign_engine::config::CampaignConfig;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

const DEMO_FIXTURE: &str = include_str!("../fixtures/demo_catalog.json");

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type ApiCampaignService =
    CampaignService<InMemoryCatalog, InMemorySnapshotStore, InMemoryMetricsSource>;

#[derive(Debug, Deserialize)]
pub(crate) struct Membership {
    pub(crate) usuario_id: UsuarioId,
    #[serde(default)]
    pub(crate) segment_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserMetrics {
    pub(crate) usuario_id: UsuarioId,
    pub(crate) metrics: CampaignEvaluationMetrics,
}

/// Seed data for the in-memory adapters: the catalogue tables plus each user's metrics.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CatalogFixture {
    #[serde(default)]
    pub(crate) users: Vec<UsuarioSesion>,
    #[serde(default)]
    pub(crate) segments: Vec<Segment>,
    #[serde(default)]
    pub(crate) memberships: Vec<Membership>,
    #[serde(default)]
    pub(crate) campaigns: Vec<Campaign>,
    #[serde(default)]
    pub(crate) segment_links: Vec<CampaignSegmentLink>,
    #[serde(default)]
    pub(crate) rules: Vec<CampaignRule>,
    #[serde(default)]
    pub(crate) rewards: Vec<CampaignReward>,
    #[serde(default)]
    pub(crate) metrics: Vec<UserMetrics>,
}

impl CatalogFixture {
    /// Reads the fixture at `path`, or the bundled demo catalogue when none is given.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, io::Error> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::parse(&raw)
            }
            None => Self::parse(DEMO_FIXTURE),
        }
    }

    pub(crate) fn parse(raw: &str) -> Result<Self, io::Error> {
        serde_json::from_str(raw).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    pub(crate) fn into_service(self, config: CampaignConfig) -> Arc<ApiCampaignService> {
        let (catalog, metrics) = self.into_adapters();
        Arc::new(CampaignService::new(
            Arc::new(catalog),
            Arc::new(InMemorySnapshotStore::default()),
            Arc::new(metrics),
            config,
        ))
    }

    pub(crate) fn into_adapters(self) -> (InMemoryCatalog, InMemoryMetricsSource) {
        let metrics = InMemoryMetricsSource {
            metrics: self
                .metrics
                .into_iter()
                .map(|entry| (entry.usuario_id, entry.metrics))
                .collect(),
        };
        let catalog = InMemoryCatalog {
            users: self.users,
            segments: self.segments,
            memberships: self
                .memberships
                .into_iter()
                .map(|entry| (entry.usuario_id, entry.segment_ids))
                .collect(),
            campaigns: self.campaigns,
            links: self.segment_links,
            rules: self.rules,
            rewards: self.rewards,
        };
        (catalog, metrics)
    }
}

/// Read-only catalogue backed by the fixture tables.
#[derive(Debug, Default)]
pub(crate) struct InMemoryCatalog {
    users: Vec<UsuarioSesion>,
    segments: Vec<Segment>,
    memberships: HashMap<UsuarioId, Vec<String>>,
    campaigns: Vec<Campaign>,
    links: Vec<CampaignSegmentLink>,
    rules: Vec<CampaignRule>,
    rewards: Vec<CampaignReward>,
}

impl InMemoryCatalog {
    pub(crate) fn campaigns(&self) -> &[Campaign] {
        &self.campaigns
    }

    pub(crate) fn rules_for(&self, campaign_id: &CampaignId) -> Vec<CampaignRule> {
        let mut rules: Vec<CampaignRule> = self
            .rules
            .iter()
            .filter(|rule| &rule.campaign_id == campaign_id)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.priority);
        rules
    }

    /// Primary segment first, then linked segments in link order.
    pub(crate) fn segment_names(&self, campaign: &Campaign) -> Vec<String> {
        let mut ids: Vec<&String> = campaign.primary_segment_id.iter().collect();
        let mut links: Vec<&CampaignSegmentLink> = self
            .links
            .iter()
            .filter(|link| link.campaign_id == campaign.id)
            .collect();
        links.sort_by_key(|link| link.sort_order);
        for link in links {
            if !ids.contains(&&link.segment_id) {
                ids.push(&link.segment_id);
            }
        }

        ids.into_iter()
            .map(|id| {
                self.segments
                    .iter()
                    .find(|segment| &segment.id == id)
                    .map_or_else(|| id.clone(), |segment| segment.name.clone())
            })
            .collect()
    }
}

impl CampaignCatalog for InMemoryCatalog {
    fn fetch_user(&self, id: UsuarioId) -> Result<Option<UsuarioSesion>, CatalogError> {
        Ok(self.users.iter().find(|user| user.id == id).cloned())
    }

    fn fetch_campaigns(
        &self,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<Campaign>, CatalogError> {
        Ok(self
            .campaigns
            .iter()
            .filter(|campaign| status.map_or(true, |status| campaign.status == status))
            .cloned()
            .collect())
    }

    fn fetch_campaign_by_slug(&self, slug: &str) -> Result<Option<Campaign>, CatalogError> {
        Ok(self
            .campaigns
            .iter()
            .find(|campaign| campaign.slug == slug)
            .cloned())
    }

    fn fetch_campaign_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, CatalogError> {
        Ok(self
            .campaigns
            .iter()
            .find(|campaign| &campaign.id == id)
            .cloned())
    }

    fn fetch_campaign_rules_map(
        &self,
        campaign_ids: &[CampaignId],
    ) -> Result<BTreeMap<CampaignId, Vec<CampaignRule>>, CatalogError> {
        Ok(campaign_ids
            .iter()
            .map(|id| (id.clone(), self.rules_for(id)))
            .filter(|(_, rules)| !rules.is_empty())
            .collect())
    }

    fn fetch_campaign_segments_map(
        &self,
        campaign_ids: &[CampaignId],
    ) -> Result<BTreeMap<CampaignId, Vec<CampaignSegmentLink>>, CatalogError> {
        let mut map: BTreeMap<CampaignId, Vec<CampaignSegmentLink>> = BTreeMap::new();
        for link in self
            .links
            .iter()
            .filter(|link| campaign_ids.contains(&link.campaign_id))
        {
            map.entry(link.campaign_id.clone())
                .or_default()
                .push(link.clone());
        }
        for links in map.values_mut() {
            links.sort_by_key(|link| link.sort_order);
        }
        Ok(map)
    }

    fn fetch_segments_by_ids(&self, ids: &[String]) -> Result<Vec<Segment>, CatalogError> {
        Ok(self
            .segments
            .iter()
            .filter(|segment| ids.contains(&segment.id))
            .cloned()
            .collect())
    }

    fn fetch_user_segment_ids(&self, usuario_id: UsuarioId) -> Result<Vec<String>, CatalogError> {
        Ok(self
            .memberships
            .get(&usuario_id)
            .cloned()
            .unwrap_or_default())
    }

    fn fetch_campaign_rewards(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<CampaignReward>, CatalogError> {
        let mut rewards: Vec<CampaignReward> = self
            .rewards
            .iter()
            .filter(|reward| &reward.campaign_id == campaign_id)
            .cloned()
            .collect();
        rewards.sort_by_key(|reward| reward.sort_order);
        Ok(rewards)
    }
}

/// Snapshot table kept in process memory; record ids are random UUIDs.
#[derive(Default, Clone)]
pub(crate) struct InMemorySnapshotStore {
    records: Arc<Mutex<HashMap<(CampaignId, UsuarioId), CampaignProgressSnapshot>>>,
}

impl InMemorySnapshotStore {
    fn lock(
        &self,
    ) -> Result<
        std::sync::MutexGuard<'_, HashMap<(CampaignId, UsuarioId), CampaignProgressSnapshot>>,
        SnapshotError,
    > {
        self.records
            .lock()
            .map_err(|_| SnapshotError::Unavailable("snapshot mutex poisoned".to_string()))
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn latest(
        &self,
        campaign_id: &CampaignId,
        usuario_id: UsuarioId,
    ) -> Result<Option<CampaignProgressSnapshot>, SnapshotError> {
        let guard = self.lock()?;
        Ok(guard.get(&(campaign_id.clone(), usuario_id)).cloned())
    }

    fn upsert(&self, write: SnapshotWrite) -> Result<CampaignProgressSnapshot, SnapshotError> {
        let mut guard = self.lock()?;
        let key = (write.campaign_id.clone(), write.usuario_id);
        let id = guard
            .get(&key)
            .map(|existing| existing.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let snapshot = write.into_snapshot(id);
        guard.insert(key, snapshot.clone());
        Ok(snapshot)
    }

    fn invalidate(
        &self,
        campaign_id: &CampaignId,
        usuario_id: Option<UsuarioId>,
    ) -> Result<usize, SnapshotError> {
        let mut guard = self.lock()?;
        let before = guard.len();
        guard.retain(|(campaign, usuario), _| match usuario_id {
            Some(target) => campaign != campaign_id || *usuario != target,
            None => campaign != campaign_id,
        });
        Ok(before - guard.len())
    }

    fn purge_evaluated_before(&self, cutoff: DateTime<Utc>) -> Result<usize, SnapshotError> {
        let mut guard = self.lock()?;
        let before = guard.len();
        guard.retain(|_, snapshot| snapshot.evaluated_at >= cutoff);
        Ok(before - guard.len())
    }

    fn list_for_campaign(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<CampaignProgressSnapshot>, SnapshotError> {
        let guard = self.lock()?;
        Ok(guard
            .values()
            .filter(|snapshot| &snapshot.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}

/// Metrics keyed by user; users without an entry get an empty snapshot.
#[derive(Debug, Default)]
pub(crate) struct InMemoryMetricsSource {
    metrics: HashMap<UsuarioId, CampaignEvaluationMetrics>,
}

#[async_trait]
impl MetricsSource for InMemoryMetricsSource {
    async fn fetch_campaign_metrics(
        &self,
        usuario_id: UsuarioId,
    ) -> Result<CampaignEvaluationMetrics, MetricsError> {
        match self.metrics.get(&usuario_id) {
            Some(metrics) => Ok(metrics.clone()),
            None => {
                debug!(usuario_id = %usuario_id, "no metrics seeded; using empty snapshot");
                Ok(CampaignEvaluationMetrics::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_engine::campaigns::{CampaignProgressStatus, SnapshotMeta};

    #[test]
    fn bundled_fixture_parses() {
        let fixture = CatalogFixture::load(None).expect("demo fixture parses");
        assert_eq!(fixture.campaigns.len(), 4);
        assert_eq!(fixture.users.len(), 4);

        let (catalog, _) = fixture.into_adapters();
        let oro = catalog
            .fetch_campaign_by_slug("ranking-oro")
            .expect("catalog lookup")
            .expect("campaign exists");
        assert_eq!(
            catalog.segment_names(&oro),
            vec!["Asesores Oro".to_string(), "Región DCN".to_string()]
        );
        assert_eq!(catalog.rules_for(&oro.id).len(), 3);
    }

    #[test]
    fn malformed_fixture_is_invalid_data() {
        let err = CatalogFixture::parse("{ \"campaigns\": 3 }").expect_err("rejects bad shape");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn snapshot_ids_survive_overwrites() {
        let store = InMemorySnapshotStore::default();
        let write = |progress: f64| SnapshotWrite {
            campaign_id: CampaignId("camp-vida".to_string()),
            usuario_id: UsuarioId(101),
            eligible: true,
            progress,
            status: CampaignProgressStatus::Eligible,
            metrics: CampaignEvaluationMetrics::default(),
            meta: SnapshotMeta::default(),
            evaluated_at: Utc::now(),
        };

        let first = store.upsert(write(0.25)).expect("insert");
        let second = store.upsert(write(0.5)).expect("overwrite");
        assert_eq!(first.id, second.id);
        assert!(Uuid::parse_str(&first.id).is_ok());

        let listed = store
            .list_for_campaign(&CampaignId("camp-vida".to_string()))
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].progress, 0.5);
    }

    #[tokio::test]
    async fn unseeded_users_get_empty_metrics() {
        let fixture = CatalogFixture::load(None).expect("demo fixture parses");
        let (_, source) = fixture.into_adapters();
        let metrics = source
            .fetch_campaign_metrics(UsuarioId(900))
            .await
            .expect("metrics");
        assert_eq!(metrics, CampaignEvaluationMetrics::default());

        let seeded = source
            .fetch_campaign_metrics(UsuarioId(101))
            .await
            .expect("metrics");
        assert_eq!(seeded.tenure_meses, Some(14.0));
    }
}
