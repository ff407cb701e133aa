use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::campaigns::cache::Clock;
use crate::campaigns::catalog::{CampaignCatalog, CatalogError, MetricsError, MetricsSource};
use crate::campaigns::domain::{
    ActiveRange, Campaign, CampaignEvaluationContext, CampaignId, CampaignReward, CampaignRule,
    CampaignSegmentLink, CampaignStatus, RuleKind, RuleScope, Segment, UsuarioId, UsuarioSesion,
};
use crate::campaigns::metrics::CampaignEvaluationMetrics;
use crate::campaigns::snapshot::{
    CampaignProgressSnapshot, SnapshotError, SnapshotStore, SnapshotWrite,
};
use crate::campaigns::{campaign_router, CampaignService};
use crate::config::CampaignConfig;

pub(super) const CRON_SECRET: &str = "limpieza-secreta";

pub(super) fn at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub(super) fn now() -> DateTime<Utc> {
    at("2025-06-15T12:00:00Z")
}

pub(super) fn campaign(id: &str, slug: &str) -> Campaign {
    Campaign {
        id: CampaignId(id.to_string()),
        slug: slug.to_string(),
        name: format!("Campaña {slug}"),
        summary: None,
        description: None,
        status: CampaignStatus::Active,
        active_range: ActiveRange::parse("[2025-01-01,2026-01-01)"),
        primary_segment_id: None,
        notes: None,
    }
}

pub(super) fn rule(id: &str, scope: RuleScope, kind: &str, config: Value) -> CampaignRule {
    rule_for("camp-1", id, scope, kind, config)
}

pub(super) fn rule_for(
    campaign_id: &str,
    id: &str,
    scope: RuleScope,
    kind: &str,
    config: Value,
) -> CampaignRule {
    CampaignRule {
        id: id.to_string(),
        campaign_id: CampaignId(campaign_id.to_string()),
        scope,
        rule_kind: RuleKind::from(kind.to_string()),
        config,
        priority: 0,
        description: None,
    }
}

pub(super) fn eligibility(id: &str, kind: &str, config: Value) -> CampaignRule {
    rule(id, RuleScope::Eligibility, kind, config)
}

pub(super) fn goal(id: &str, kind: &str, config: Value) -> CampaignRule {
    rule(id, RuleScope::Goal, kind, config)
}

pub(super) fn context(role: Option<&str>, segments: &[&str]) -> CampaignEvaluationContext {
    CampaignEvaluationContext {
        usuario_rol: role.map(str::to_string),
        segment_ids: segments.iter().map(|segment| segment.to_string()).collect(),
        segment_slugs: Vec::new(),
    }
}

pub(super) fn agent_metrics() -> CampaignEvaluationMetrics {
    CampaignEvaluationMetrics::default()
        .with("polizas", "vigentes", 4_i64)
        .with("polizas", "prima_total_mxn", 3000_i64)
}

pub(super) fn user(id: i64, rol: &str, activo: bool) -> UsuarioSesion {
    UsuarioSesion {
        id: UsuarioId(id),
        rol: Some(rol.to_string()),
        email: Some(format!("usuario{id}@agencia.mx")),
        activo,
    }
}

pub(super) fn segment(id: &str, name: &str) -> Segment {
    Segment {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        active: true,
    }
}

pub(super) fn campaign_config() -> CampaignConfig {
    CampaignConfig {
        cache_ttl_seconds: 300,
        purge_max_age_minutes: 5,
        cron_secret: Some(CRON_SECRET.to_string()),
    }
}

/// Clock pinned to a settable instant.
pub(super) struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub(super) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(super) fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

#[derive(Default)]
pub(super) struct MemorySnapshotStore {
    records: Mutex<HashMap<(CampaignId, UsuarioId), CampaignProgressSnapshot>>,
    sequence: AtomicUsize,
    writes: AtomicUsize,
}

impl MemorySnapshotStore {
    pub(super) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(super) fn snapshots(&self) -> Vec<CampaignProgressSnapshot> {
        let guard = self.records.lock().expect("store mutex poisoned");
        let mut snapshots: Vec<_> = guard.values().cloned().collect();
        snapshots.sort_by(|left, right| left.id.cmp(&right.id));
        snapshots
    }

    pub(super) fn seed(&self, snapshot: CampaignProgressSnapshot) {
        self.records.lock().expect("store mutex poisoned").insert(
            (snapshot.campaign_id.clone(), snapshot.usuario_id),
            snapshot,
        );
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn latest(
        &self,
        campaign_id: &CampaignId,
        usuario_id: UsuarioId,
    ) -> Result<Option<CampaignProgressSnapshot>, SnapshotError> {
        let guard = self.records.lock().expect("store mutex poisoned");
        Ok(guard.get(&(campaign_id.clone(), usuario_id)).cloned())
    }

    fn upsert(&self, write: SnapshotWrite) -> Result<CampaignProgressSnapshot, SnapshotError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.records.lock().expect("store mutex poisoned");
        let key = (write.campaign_id.clone(), write.usuario_id);
        let id = match guard.get(&key) {
            Some(existing) => existing.id.clone(),
            None => format!("snap-{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1),
        };
        let snapshot = write.into_snapshot(id);
        guard.insert(key, snapshot.clone());
        Ok(snapshot)
    }

    fn invalidate(
        &self,
        campaign_id: &CampaignId,
        usuario_id: Option<UsuarioId>,
    ) -> Result<usize, SnapshotError> {
        let mut guard = self.records.lock().expect("store mutex poisoned");
        let before = guard.len();
        guard.retain(|(campaign, usuario), _| {
            campaign != campaign_id || usuario_id.map_or(false, |target| target != *usuario)
        });
        Ok(before - guard.len())
    }

    fn purge_evaluated_before(&self, cutoff: DateTime<Utc>) -> Result<usize, SnapshotError> {
        let mut guard = self.records.lock().expect("store mutex poisoned");
        let before = guard.len();
        guard.retain(|_, snapshot| snapshot.evaluated_at >= cutoff);
        Ok(before - guard.len())
    }

    fn list_for_campaign(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<CampaignProgressSnapshot>, SnapshotError> {
        Ok(self
            .snapshots()
            .into_iter()
            .filter(|snapshot| &snapshot.campaign_id == campaign_id)
            .collect())
    }
}

pub(super) struct FailingSnapshotStore;

impl SnapshotStore for FailingSnapshotStore {
    fn latest(
        &self,
        _campaign_id: &CampaignId,
        _usuario_id: UsuarioId,
    ) -> Result<Option<CampaignProgressSnapshot>, SnapshotError> {
        Err(SnapshotError::Unavailable("database offline".to_string()))
    }

    fn upsert(&self, _write: SnapshotWrite) -> Result<CampaignProgressSnapshot, SnapshotError> {
        Err(SnapshotError::Unavailable("database offline".to_string()))
    }

    fn invalidate(
        &self,
        _campaign_id: &CampaignId,
        _usuario_id: Option<UsuarioId>,
    ) -> Result<usize, SnapshotError> {
        Err(SnapshotError::Unavailable("database offline".to_string()))
    }

    fn purge_evaluated_before(&self, _cutoff: DateTime<Utc>) -> Result<usize, SnapshotError> {
        Err(SnapshotError::Unavailable("database offline".to_string()))
    }

    fn list_for_campaign(
        &self,
        _campaign_id: &CampaignId,
    ) -> Result<Vec<CampaignProgressSnapshot>, SnapshotError> {
        Err(SnapshotError::Unavailable("database offline".to_string()))
    }
}

/// Metrics source that counts calls and yields before answering, so concurrent callers overlap.
pub(super) struct CountingMetrics {
    metrics: Mutex<CampaignEvaluationMetrics>,
    calls: AtomicUsize,
    failing: bool,
}

impl CountingMetrics {
    pub(super) fn new(metrics: CampaignEvaluationMetrics) -> Self {
        Self {
            metrics: Mutex::new(metrics),
            calls: AtomicUsize::new(0),
            failing: false,
        }
    }

    pub(super) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new(CampaignEvaluationMetrics::default())
        }
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(super) fn replace(&self, metrics: CampaignEvaluationMetrics) {
        *self.metrics.lock().expect("metrics mutex poisoned") = metrics;
    }
}

#[async_trait]
impl MetricsSource for CountingMetrics {
    async fn fetch_campaign_metrics(
        &self,
        usuario_id: UsuarioId,
    ) -> Result<CampaignEvaluationMetrics, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        if self.failing {
            return Err(MetricsError::Unavailable {
                usuario_id,
                reason: "aggregation timed out".to_string(),
            });
        }
        Ok(self.metrics.lock().expect("metrics mutex poisoned").clone())
    }
}

#[derive(Default)]
pub(super) struct MemoryCatalog {
    pub(super) users: Vec<UsuarioSesion>,
    pub(super) campaigns: Vec<Campaign>,
    pub(super) rules: Vec<CampaignRule>,
    pub(super) links: Vec<CampaignSegmentLink>,
    pub(super) segments: Vec<Segment>,
    pub(super) memberships: HashMap<UsuarioId, Vec<String>>,
    pub(super) rewards: Vec<CampaignReward>,
}

impl CampaignCatalog for MemoryCatalog {
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
        let mut map: BTreeMap<CampaignId, Vec<CampaignRule>> = BTreeMap::new();
        for rule in self
            .rules
            .iter()
            .filter(|rule| campaign_ids.contains(&rule.campaign_id))
        {
            map.entry(rule.campaign_id.clone())
                .or_default()
                .push(rule.clone());
        }
        for rules in map.values_mut() {
            rules.sort_by_key(|rule| rule.priority);
        }
        Ok(map)
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
        Ok(self
            .rewards
            .iter()
            .filter(|reward| &reward.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}

/// Agency catalogue used by the service and routing tests.
///
/// * `bono-vida` (camp-1): open to agents and admins, two goals.
/// * `segmento-oro` (camp-2): restricted to `seg-oro` members.
/// * `futura` (camp-3): starts in 2027.
/// * `borrador` (camp-4): draft.
pub(super) fn agency_catalog() -> MemoryCatalog {
    let mut oro = campaign("camp-2", "segmento-oro");
    oro.primary_segment_id = Some("seg-oro".to_string());
    let mut futura = campaign("camp-3", "futura");
    futura.active_range = ActiveRange::parse("[2027-01-01,2027-06-01)");
    let mut borrador = campaign("camp-4", "borrador");
    borrador.status = CampaignStatus::Draft;

    let mut memberships = HashMap::new();
    memberships.insert(UsuarioId(1), vec!["seg-plata".to_string()]);
    memberships.insert(UsuarioId(2), vec!["seg-oro".to_string()]);

    MemoryCatalog {
        users: vec![
            user(1, "agente", true),
            user(2, "admin", true),
            user(3, "agente", false),
        ],
        campaigns: vec![campaign("camp-1", "bono-vida"), oro, futura, borrador],
        rules: vec![
            rule_for(
                "camp-1",
                "r-role",
                RuleScope::Eligibility,
                "ROLE",
                serde_json::json!({"allow": ["agente", "admin"]}),
            ),
            rule_for(
                "camp-1",
                "r-count",
                RuleScope::Goal,
                "COUNT_POLICIES",
                serde_json::json!({"field": "vigentes", "min": 3}),
            ),
            rule_for(
                "camp-1",
                "r-premium",
                RuleScope::Goal,
                "TOTAL_PREMIUM",
                serde_json::json!({"min": 5000}),
            ),
            rule_for(
                "camp-2",
                "r-segment",
                RuleScope::Eligibility,
                "SEGMENT",
                serde_json::json!({"include": ["seg-oro"]}),
            ),
        ],
        links: vec![CampaignSegmentLink {
            campaign_id: CampaignId("camp-2".to_string()),
            segment_id: "seg-plata".to_string(),
            sort_order: 1,
        }],
        segments: vec![segment("seg-oro", "Oro"), segment("seg-plata", "Plata")],
        memberships,
        rewards: vec![CampaignReward {
            id: "rw-1".to_string(),
            campaign_id: CampaignId("camp-1".to_string()),
            title: "Viaje a Cancún".to_string(),
            description: None,
            is_accumulative: false,
            sort_order: 0,
        }],
    }
}

pub(super) type TestService =
    CampaignService<MemoryCatalog, MemorySnapshotStore, CountingMetrics, FixedClock>;

pub(super) struct Harness {
    pub(super) service: Arc<TestService>,
    pub(super) store: Arc<MemorySnapshotStore>,
    pub(super) metrics: Arc<CountingMetrics>,
    pub(super) clock: Arc<FixedClock>,
}

pub(super) fn build_service(catalog: MemoryCatalog) -> Harness {
    let store = Arc::new(MemorySnapshotStore::default());
    let metrics = Arc::new(CountingMetrics::new(agent_metrics()));
    let clock = Arc::new(FixedClock::new(now()));
    let service = Arc::new(CampaignService::with_clock(
        Arc::new(catalog),
        store.clone(),
        metrics.clone(),
        clock.clone(),
        campaign_config(),
    ));
    Harness {
        service,
        store,
        metrics,
        clock,
    }
}

pub(super) fn router_with_service(service: Arc<TestService>) -> axum::Router {
    campaign_router(service)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
