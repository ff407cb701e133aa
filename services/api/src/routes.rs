use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use campaign_engine::campaigns::{
    campaign_router, CampaignCatalog, CampaignService, Clock, MetricsSource, SnapshotStore,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_campaign_routes<C, S, M, K>(
    service: Arc<CampaignService<C, S, M, K>>,
) -> axum::Router
where
    C: CampaignCatalog + 'static,
    S: SnapshotStore + 'static,
    M: MetricsSource + 'static,
    K: Clock + 'static,
{
    campaign_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::CatalogFixture;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use campaign_engine::config::CampaignConfig;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    fn app(ready: bool) -> axum::Router {
        let service = CatalogFixture::load(None)
            .expect("demo fixture parses")
            .into_service(CampaignConfig::default());
        let recorder = PrometheusBuilder::new().build_recorder();
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(recorder.handle()),
        };
        with_campaign_routes(service).layer(Extension(state))
    }

    async fn get_json(router: axum::Router, uri: &str, usuario: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::get(uri);
        if let Some(usuario) = usuario {
            builder = builder.header("x-usuario-id", usuario);
        }
        let response = router
            .oneshot(builder.body(Body::empty()).expect("request builds"))
            .await
            .expect("route executes");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let payload = serde_json::from_slice(&bytes).expect("json body");
        (status, payload)
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let (status, payload) = get_json(app(false), "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn readiness_tracks_the_flag() {
        let (status, payload) = get_json(app(false), "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload["status"], json!("initializing"));

        let (status, payload) = get_json(app(true), "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], json!("ready"));
    }

    #[tokio::test]
    async fn demo_catalogue_is_served() {
        let router = app(true);

        let (status, payload) = get_json(router.clone(), "/api/campaigns", Some("102")).await;
        assert_eq!(status, StatusCode::OK);
        let slugs: Vec<&str> = payload["campaigns"]
            .as_array()
            .expect("campaign array")
            .iter()
            .filter_map(|item| item["campaign"]["slug"].as_str())
            .collect();
        assert_eq!(slugs, vec!["bono-vida-2025", "ranking-oro"]);

        let (status, payload) =
            get_json(router.clone(), "/api/campaigns/ranking-oro", Some("102")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["evaluation"]["status"], json!("completed"));
        assert_eq!(payload["cache"]["fromCache"], json!(true));

        let (status, _) = get_json(router, "/api/campaigns/ranking-oro", Some("101")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
