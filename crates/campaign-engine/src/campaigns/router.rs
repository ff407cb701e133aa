use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::cache::Clock;
use super::catalog::{CampaignCatalog, MetricsSource};
use super::domain::{CampaignId, CampaignRule, RuleScope, UsuarioId, UsuarioSesion};
use super::service::{CampaignQuery, CampaignService, CampaignServiceError};
use super::snapshot::SnapshotStore;
use super::visibility::parse_positive_number;

/// Header carrying the authenticated portal user id, set by the session gateway.
pub const USUARIO_HEADER: &str = "x-usuario-id";

/// Router builder exposing the portal, admin, and cron endpoints.
pub fn campaign_router<C, S, M, K>(service: Arc<CampaignService<C, S, M, K>>) -> Router
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    Router::new()
        .route("/api/campaigns", get(list_handler::<C, S, M, K>))
        .route("/api/campaigns/:slug", get(detail_handler::<C, S, M, K>))
        .route(
            "/api/admin/campaigns/datasets",
            get(datasets_handler::<C, S, M, K>),
        )
        .route(
            "/api/admin/campaigns/rules/validate",
            post(validate_handler::<C, S, M, K>),
        )
        .route(
            "/api/admin/campaigns/:campaign_id/progress",
            get(progress_handler::<C, S, M, K>).delete(invalidate_handler::<C, S, M, K>),
        )
        .route(
            "/api/cron/clean-campaign-cache",
            get(purge_handler::<C, S, M, K>),
        )
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CampaignParams {
    ttl: Option<String>,
    include_upcoming: Option<String>,
}

impl CampaignParams {
    fn query(&self) -> CampaignQuery {
        CampaignQuery {
            ttl_seconds: parse_positive_number(self.ttl.as_deref()),
            include_upcoming: self.include_upcoming.as_deref() == Some("1"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DatasetParams {
    scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProgressParams {
    usuario_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PurgeParams {
    max_age: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValidateRulesRequest {
    rules: Vec<CampaignRule>,
}

pub(crate) async fn list_handler<C, S, M, K>(
    State(service): State<Arc<CampaignService<C, S, M, K>>>,
    headers: HeaderMap,
    Query(params): Query<CampaignParams>,
) -> Response
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    let user = match service.resolve_user(session_user(&headers)) {
        Ok(user) => user,
        Err(err) => return error_response(err),
    };

    match service.list_for_user(&user, &params.query()).await {
        Ok(payload) => (StatusCode::OK, axum::Json(payload)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn detail_handler<C, S, M, K>(
    State(service): State<Arc<CampaignService<C, S, M, K>>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Query(params): Query<CampaignParams>,
) -> Response
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    let user = match service.resolve_user(session_user(&headers)) {
        Ok(user) => user,
        Err(err) => return error_response(err),
    };

    match service.detail_for_user(&user, &slug, &params.query()).await {
        Ok(payload) => (StatusCode::OK, axum::Json(payload)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn datasets_handler<C, S, M, K>(
    State(service): State<Arc<CampaignService<C, S, M, K>>>,
    headers: HeaderMap,
    Query(params): Query<DatasetParams>,
) -> Response
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    if let Err(err) = admin_user(&service, &headers) {
        return error_response(err);
    }

    let scope = match params.scope.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match RuleScope::parse(raw) {
            Some(scope) => Some(scope),
            None => {
                return error_response(CampaignServiceError::InvalidQuery(format!(
                    "scope '{raw}'"
                )))
            }
        },
    };

    let datasets = service.datasets(scope);
    let payload = json!({ "datasets": datasets });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn validate_handler<C, S, M, K>(
    State(service): State<Arc<CampaignService<C, S, M, K>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<ValidateRulesRequest>,
) -> Response
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    if let Err(err) = admin_user(&service, &headers) {
        return error_response(err);
    }

    let issues = service.validate_rules(&request.rules);
    let payload = json!({
        "valid": issues.is_empty(),
        "issues": issues,
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn progress_handler<C, S, M, K>(
    State(service): State<Arc<CampaignService<C, S, M, K>>>,
    Path(campaign_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    if let Err(err) = admin_user(&service, &headers) {
        return error_response(err);
    }

    match service.progress_summary(&CampaignId(campaign_id)) {
        Ok(summary) => {
            (StatusCode::OK, axum::Json(json!({ "summary": summary }))).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn invalidate_handler<C, S, M, K>(
    State(service): State<Arc<CampaignService<C, S, M, K>>>,
    Path(campaign_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<ProgressParams>,
) -> Response
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    if let Err(err) = admin_user(&service, &headers) {
        return error_response(err);
    }

    let usuario_id = match params.usuario_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) => Some(UsuarioId(id)),
            Err(_) => {
                return error_response(CampaignServiceError::InvalidQuery(format!(
                    "usuarioId '{raw}'"
                )))
            }
        },
    };

    match service.invalidate_progress(&CampaignId(campaign_id), usuario_id) {
        Ok(removed) => {
            let payload = json!({
                "success": true,
                "removed": removed,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn purge_handler<C, S, M, K>(
    State(service): State<Arc<CampaignService<C, S, M, K>>>,
    headers: HeaderMap,
    Query(params): Query<PurgeParams>,
) -> Response
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if let Err(err) = service.authorize_cron(bearer, params.token.as_deref()) {
        return error_response(err);
    }

    let max_age = params
        .max_age
        .as_deref()
        .and_then(|raw| raw.trim().parse::<u64>().ok());

    match service.purge_stale_snapshots(max_age) {
        Ok(report) => {
            let payload = json!({
                "success": true,
                "deletedCount": report.deleted_count,
                "cutoffTime": report.cutoff_time,
                "maxAgeMinutes": report.max_age_minutes,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) fn session_user(headers: &HeaderMap) -> Option<UsuarioId> {
    headers
        .get(USUARIO_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()
        .map(UsuarioId)
}

fn admin_user<C, S, M, K>(
    service: &CampaignService<C, S, M, K>,
    headers: &HeaderMap,
) -> Result<UsuarioSesion, CampaignServiceError>
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    let user = service.resolve_user(session_user(headers))?;
    service.require_admin(&user)?;
    Ok(user)
}

fn error_response(err: CampaignServiceError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "campaign request failed");
    }
    let payload = json!({
        "error": err.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}
