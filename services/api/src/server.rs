use crate::cli::ServeArgs;
use crate::infra::{seed_sample_school, AppState, InMemoryNotifier};
use crate::routes::with_academic_routes;
use academic_engine::academics::{AcademicEngine, InMemoryAcademicStore};
use academic_engine::config::AppConfig;
use academic_engine::error::AppError;
use academic_engine::telemetry;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
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

    let store = InMemoryAcademicStore::new();
    if let Some(session_start) = args.sample_school {
        seed_sample_school(&store, session_start);
    }
    let engine = Arc::new(AcademicEngine::new(
        Arc::new(store),
        Arc::new(InMemoryNotifier::default()),
        config.engine,
    ));

    let app = with_academic_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        item_timeout_ms = config.engine.promotion_item_timeout.as_millis() as u64,
        "academic engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
