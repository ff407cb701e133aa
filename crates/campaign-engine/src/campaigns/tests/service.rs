use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Duration;

use super::common::*;
use crate::campaigns::datasets::DATASET_DEFINITIONS;
use crate::campaigns::domain::{CampaignId, RuleScope, UsuarioId, UsuarioSesion};
use crate::campaigns::evaluation::CampaignProgressStatus;
use crate::campaigns::service::{CampaignQuery, CampaignService, CampaignServiceError};
use crate::config::CampaignConfig;

fn session(harness: &Harness, id: i64) -> UsuarioSesion {
    harness
        .service
        .resolve_user(Some(UsuarioId(id)))
        .expect("active user")
}

fn slugs(response: &crate::campaigns::service::CampaignListResponse) -> Vec<&str> {
    response
        .campaigns
        .iter()
        .map(|item| item.campaign.slug.as_str())
        .collect()
}

#[test]
fn session_resolution_rejects_missing_unknown_and_inactive_users() {
    let harness = build_service(agency_catalog());
    assert!(matches!(
        harness.service.resolve_user(None),
        Err(CampaignServiceError::Unauthenticated)
    ));
    assert!(matches!(
        harness.service.resolve_user(Some(UsuarioId(99))),
        Err(CampaignServiceError::Unauthenticated)
    ));
    assert!(matches!(
        harness.service.resolve_user(Some(UsuarioId(3))),
        Err(CampaignServiceError::Inactive)
    ));

    let agent = session(&harness, 1);
    assert!(matches!(
        harness.service.require_admin(&agent),
        Err(CampaignServiceError::Forbidden)
    ));
    let admin = session(&harness, 2);
    assert!(harness.service.require_admin(&admin).is_ok());
}

#[tokio::test]
async fn list_applies_status_range_and_segment_visibility() {
    let mut catalog = agency_catalog();
    catalog.users.push(user(5, "agente", true));
    let harness = build_service(catalog);
    let query = CampaignQuery::default();

    let outsider = session(&harness, 5);
    let response = harness
        .service
        .list_for_user(&outsider, &query)
        .await
        .expect("list");
    assert_eq!(slugs(&response), vec!["bono-vida"]);

    let agent = session(&harness, 1);
    let response = harness
        .service
        .list_for_user(&agent, &query)
        .await
        .expect("list");
    assert_eq!(slugs(&response), vec!["bono-vida", "segmento-oro"]);
    let meta = response.meta.expect("meta present");
    assert_eq!(meta.total, 2);
    assert_eq!(meta.segments, 2);
}

#[tokio::test]
async fn list_evaluates_each_campaign_for_the_user() {
    let harness = build_service(agency_catalog());
    let query = CampaignQuery::default();

    let agent = session(&harness, 1);
    let response = harness
        .service
        .list_for_user(&agent, &query)
        .await
        .expect("list");
    let bono = &response.campaigns[0];
    assert!(bono.evaluation.eligible);
    assert_eq!(bono.evaluation.progress, 0.5);
    assert_eq!(bono.evaluation.status, CampaignProgressStatus::Eligible);
    assert_eq!(bono.evaluation.rule_results.len(), 3);

    let oro = &response.campaigns[1];
    assert_eq!(oro.evaluation.status, CampaignProgressStatus::NotEligible);
    assert_eq!(
        oro.segments.primary.as_ref().map(|segment| segment.name.as_str()),
        Some("Oro")
    );
    assert_eq!(oro.segments.additional.len(), 1);
    assert_eq!(oro.segments.additional[0].id, "seg-plata");

    let admin = session(&harness, 2);
    let response = harness
        .service
        .list_for_user(&admin, &query)
        .await
        .expect("list");
    assert_eq!(
        response.campaigns[1].evaluation.status,
        CampaignProgressStatus::Completed
    );
}

#[tokio::test]
async fn include_upcoming_keeps_campaigns_outside_their_range() {
    let harness = build_service(agency_catalog());
    let agent = session(&harness, 1);
    let query = CampaignQuery {
        include_upcoming: true,
        ..CampaignQuery::default()
    };

    let response = harness
        .service
        .list_for_user(&agent, &query)
        .await
        .expect("list");
    assert_eq!(slugs(&response), vec!["bono-vida", "segmento-oro", "futura"]);
}

#[tokio::test]
async fn empty_listing_has_no_meta() {
    let mut catalog = agency_catalog();
    catalog.campaigns.retain(|campaign| campaign.slug == "futura");
    let harness = build_service(catalog);
    let agent = session(&harness, 1);

    let response = harness
        .service
        .list_for_user(&agent, &CampaignQuery::default())
        .await
        .expect("list");
    assert!(response.campaigns.is_empty());
    assert!(response.meta.is_none());
    assert_eq!(harness.metrics.calls(), 0);
}

#[tokio::test]
async fn one_metrics_fetch_per_request_and_snapshots_on_repeat() {
    let harness = build_service(agency_catalog());
    let admin = session(&harness, 2);
    let query = CampaignQuery::default();

    let first = harness
        .service
        .list_for_user(&admin, &query)
        .await
        .expect("first list");
    assert!(first.campaigns.iter().all(|item| !item.cache.from_cache));
    assert_eq!(harness.metrics.calls(), 1);
    assert_eq!(harness.store.writes(), 2);

    let second = harness
        .service
        .list_for_user(&admin, &query)
        .await
        .expect("second list");
    assert!(second.campaigns.iter().all(|item| item.cache.from_cache));
    assert!(second
        .campaigns
        .iter()
        .all(|item| item.cache.snapshot_evaluated_at == Some(now())));
    assert_eq!(harness.metrics.calls(), 1);
}

#[tokio::test]
async fn ttl_override_controls_snapshot_reuse() {
    let harness = build_service(agency_catalog());
    let agent = session(&harness, 1);

    harness
        .service
        .list_for_user(&agent, &CampaignQuery::default())
        .await
        .expect("warm cache");
    harness.clock.advance(Duration::seconds(600));

    let long_ttl = CampaignQuery {
        ttl_seconds: Some(3600),
        ..CampaignQuery::default()
    };
    let cached = harness
        .service
        .list_for_user(&agent, &long_ttl)
        .await
        .expect("cached list");
    assert!(cached.campaigns.iter().all(|item| item.cache.from_cache));
    assert_eq!(harness.metrics.calls(), 1);

    let expired = harness
        .service
        .list_for_user(&agent, &CampaignQuery::default())
        .await
        .expect("expired list");
    assert!(expired.campaigns.iter().all(|item| !item.cache.from_cache));
    assert_eq!(harness.metrics.calls(), 2);
}

#[tokio::test]
async fn detail_returns_rewards_and_evaluation() {
    let harness = build_service(agency_catalog());
    let agent = session(&harness, 1);

    let detail = harness
        .service
        .detail_for_user(&agent, " bono-vida ", &CampaignQuery::default())
        .await
        .expect("detail");
    assert_eq!(detail.campaign.id, CampaignId("camp-1".into()));
    assert_eq!(detail.rewards.len(), 1);
    assert_eq!(detail.rewards[0].title, "Viaje a Cancún");
    assert_eq!(detail.evaluation.progress, 0.5);
    assert!(!detail.cache.from_cache);
    assert!(detail.segments.primary.is_none());
}

#[tokio::test]
async fn detail_error_ladder() {
    let mut catalog = agency_catalog();
    catalog.users.push(user(5, "agente", true));
    let harness = build_service(catalog);
    let outsider = session(&harness, 5);
    let query = CampaignQuery::default();

    let result = harness.service.detail_for_user(&outsider, "  ", &query).await;
    assert!(matches!(result, Err(CampaignServiceError::SlugRequired)));

    let result = harness
        .service
        .detail_for_user(&outsider, "no-existe", &query)
        .await;
    assert!(matches!(result, Err(CampaignServiceError::NotFound(slug)) if slug == "no-existe"));

    let result = harness
        .service
        .detail_for_user(&outsider, "borrador", &query)
        .await;
    assert!(matches!(result, Err(CampaignServiceError::Unavailable)));

    let result = harness
        .service
        .detail_for_user(&outsider, "segmento-oro", &query)
        .await;
    assert!(matches!(result, Err(CampaignServiceError::NotVisible)));

    let result = harness
        .service
        .detail_for_user(&outsider, "futura", &query)
        .await;
    assert!(matches!(result, Err(CampaignServiceError::OutOfRange)));

    let upcoming = CampaignQuery {
        include_upcoming: true,
        ..CampaignQuery::default()
    };
    let detail = harness
        .service
        .detail_for_user(&outsider, "futura", &upcoming)
        .await
        .expect("upcoming detail");
    assert_eq!(detail.campaign.slug, "futura");
    assert_eq!(harness.metrics.calls(), 1);
}

#[tokio::test]
async fn metrics_outage_surfaces_as_server_error() {
    let service = CampaignService::with_clock(
        Arc::new(agency_catalog()),
        Arc::new(MemorySnapshotStore::default()),
        Arc::new(CountingMetrics::failing()),
        Arc::new(FixedClock::new(now())),
        campaign_config(),
    );
    let agent = service
        .resolve_user(Some(UsuarioId(1)))
        .expect("active user");

    let err = service
        .list_for_user(&agent, &CampaignQuery::default())
        .await
        .expect_err("metrics failure propagates");
    assert!(matches!(err, CampaignServiceError::Metrics(_)));
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn admin_summary_and_invalidation() {
    let harness = build_service(agency_catalog());
    let query = CampaignQuery::default();
    for id in [1, 2] {
        let user = session(&harness, id);
        harness
            .service
            .list_for_user(&user, &query)
            .await
            .expect("list");
    }

    let oro = CampaignId("camp-2".into());
    let summary = harness.service.progress_summary(&oro).expect("summary");
    assert_eq!(summary.total, 2);
    assert_eq!(summary.eligible_total, 1);
    assert_eq!(summary.completed_total, 1);
    assert_eq!(summary.status_counts.get("not_eligible"), Some(&1));

    let removed = harness
        .service
        .invalidate_progress(&CampaignId("camp-1".into()), Some(UsuarioId(1)))
        .expect("invalidate one");
    assert_eq!(removed, 1);
    let removed = harness
        .service
        .invalidate_progress(&CampaignId("camp-1".into()), None)
        .expect("invalidate rest");
    assert_eq!(removed, 1);

    let missing = CampaignId("camp-404".into());
    assert!(matches!(
        harness.service.progress_summary(&missing),
        Err(CampaignServiceError::NotFound(_))
    ));
    assert!(matches!(
        harness.service.invalidate_progress(&missing, None),
        Err(CampaignServiceError::NotFound(_))
    ));
}

#[test]
fn cron_authorization_accepts_bearer_or_token() {
    let harness = build_service(agency_catalog());
    let service = &harness.service;
    assert!(service.authorize_cron(Some(CRON_SECRET), None).is_ok());
    assert!(service.authorize_cron(None, Some(CRON_SECRET)).is_ok());
    assert!(matches!(
        service.authorize_cron(Some("otra"), None),
        Err(CampaignServiceError::Unauthorized)
    ));
    assert!(matches!(
        service.authorize_cron(None, None),
        Err(CampaignServiceError::Unauthorized)
    ));

    let open = CampaignService::with_clock(
        Arc::new(agency_catalog()),
        Arc::new(MemorySnapshotStore::default()),
        Arc::new(CountingMetrics::new(agent_metrics())),
        Arc::new(FixedClock::new(now())),
        CampaignConfig {
            cron_secret: None,
            ..campaign_config()
        },
    );
    assert!(open.authorize_cron(None, None).is_ok());
}

#[tokio::test]
async fn purge_defaults_to_the_configured_age() {
    let harness = build_service(agency_catalog());
    let agent = session(&harness, 1);
    harness
        .service
        .list_for_user(&agent, &CampaignQuery::default())
        .await
        .expect("list");
    harness.clock.advance(Duration::minutes(6));

    let report = harness.service.purge_stale_snapshots(None).expect("purge");
    assert_eq!(report.max_age_minutes, 5);
    assert_eq!(report.deleted_count, 2);
    assert_eq!(report.cutoff_time, now() + Duration::minutes(1));

    let report = harness
        .service
        .purge_stale_snapshots(Some(60))
        .expect("purge");
    assert_eq!(report.deleted_count, 0);
}

#[test]
fn dataset_catalogue_by_scope() {
    let harness = build_service(agency_catalog());
    assert_eq!(harness.service.datasets(None).len(), DATASET_DEFINITIONS.len());
    let goals = harness.service.datasets(Some(RuleScope::Goal));
    assert!(!goals.is_empty());
    assert!(goals
        .iter()
        .all(|definition| definition.allows_scope(RuleScope::Goal)));
}

#[test]
fn error_status_codes() {
    let cases = [
        (CampaignServiceError::Unauthenticated, StatusCode::UNAUTHORIZED),
        (CampaignServiceError::Unauthorized, StatusCode::UNAUTHORIZED),
        (CampaignServiceError::Inactive, StatusCode::FORBIDDEN),
        (CampaignServiceError::Forbidden, StatusCode::FORBIDDEN),
        (CampaignServiceError::NotVisible, StatusCode::NOT_FOUND),
        (CampaignServiceError::SlugRequired, StatusCode::BAD_REQUEST),
        (
            CampaignServiceError::InvalidQuery("scope".into()),
            StatusCode::BAD_REQUEST,
        ),
        (
            CampaignServiceError::NotFound("x".into()),
            StatusCode::NOT_FOUND,
        ),
        (CampaignServiceError::Unavailable, StatusCode::NOT_FOUND),
        (CampaignServiceError::OutOfRange, StatusCode::NOT_FOUND),
    ];
    for (error, status) in cases {
        assert_eq!(error.status_code(), status, "{error}");
    }
}
