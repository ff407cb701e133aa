use crate::cli::ServeArgs;
use crate::infra::{AppState, CatalogFixture};
use crate::routes::with_campaign_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use campaign_engine::config::AppConfig;
use campaign_engine::error::AppError;
use campaign_engine::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let fixture = CatalogFixture::load(args.fixtures.as_deref())?;
    info!(
        campaigns = fixture.campaigns.len(),
        users = fixture.users.len(),
        "campaign catalogue loaded"
    );
    let campaign_service = fixture.into_service(config.campaigns.clone());

    let app = with_campaign_routes(campaign_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "campaign engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
