use crate::cli::ServeArgs;
use crate::infra::{
    grader_from_config, AppState, InMemoryContentRepository, InMemorySessionRepository,
};
use crate::routes::with_practice_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use ielts_practice::config::AppConfig;
use ielts_practice::error::AppError;
use ielts_practice::practice::{GradingDispatcher, GradingWorker, PracticeService, ScoringEngine};
use ielts_practice::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

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

    let sessions = Arc::new(InMemorySessionRepository::default());
    let content = Arc::new(InMemoryContentRepository::with_sample_content());

    let grader = grader_from_config(&config.grading)
        .map_err(|err| AppError::Io(std::io::Error::other(err)))?;
    if config.grading.grader_url.is_none() {
        warn!("GRADER_URL is not set; essays will be marked as failed until it is configured");
    }

    let (dispatcher, receiver) = GradingDispatcher::channel(config.grading.queue_capacity);
    GradingWorker::new(
        sessions.clone(),
        Arc::new(grader),
        config.grading.retry_policy(),
    )
    .spawn(receiver);

    let practice_service = Arc::new(PracticeService::new(
        sessions,
        content,
        dispatcher,
        ScoringEngine::new(config.scoring.clone()),
    ));

    let app = with_practice_routes(practice_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        pending_writing = ?config.scoring.pending_writing,
        "ielts practice service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
