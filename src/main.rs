//! Gastric Cancer Survival Risk Service - Main Entry Point
//!
//! Serves the assessment API over HTTP and, when enabled, answers
//! assessment requests arriving on NATS.

use anyhow::{Context, Result};
use futures::StreamExt;
use gastric_survival_risk::{
    api::{create_router, AppState},
    config::{AppConfig, LoggingConfig},
    consumer::{respond, AssessmentConsumer},
    metrics::{MetricsReporter, ServiceMetrics},
    pipeline::RiskService,
    producer::ReplyPublisher,
    reconciler::FeatureReconciler,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Gastric Cancer Survival Risk Service");
    info!(
        model = %config.model.path,
        format = ?config.model.format,
        features = config.features.len(),
        "Configuration loaded successfully"
    );

    let metrics = Arc::new(ServiceMetrics::new());
    let service = Arc::new(RiskService::from_config(&config, metrics.clone())?);

    // Load eagerly so deployment problems show up at startup
    let handle = service.handle().clone();
    let loaded = tokio::task::spawn_blocking(move || handle.get()).await?;
    match loaded {
        Ok(model) => {
            let reconciler = FeatureReconciler::new(service.catalog(), model.expected_feature_order());
            if !reconciler.uses_model_order() {
                warn!("Model does not declare its feature order, using the form's declaration order");
            }
            for warning in reconciler.schema_warnings() {
                warn!(%warning, "Feature schema mismatch");
            }
            info!(
                model = %model.name,
                input_order = ?reconciler.input_order(),
                "Model ready"
            );
        }
        Err(e) => error!(error = %e, "Model unavailable, assessments will be rejected"),
    }

    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    if config.nats.enabled {
        let client = async_nats::connect(&config.nats.url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
        info!("Connected to NATS at {}", config.nats.url);

        let consumer = AssessmentConsumer::new(client.clone(), &config.nats.request_subject, &config.nats.queue_group);
        let publisher = ReplyPublisher::new(client);
        let subscription = consumer.subscribe().await?;
        info!(
            workers = config.nats.workers,
            subject = consumer.subject(),
            "Starting NATS request loop"
        );

        tokio::spawn(serve_nats(
            subscription,
            service.clone(),
            publisher,
            config.nats.workers,
        ));
    }

    let app = create_router(AppState::new(service));
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(address.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("HTTP API listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    match logging.format.as_str() {
        "json" => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

/// Answer requests in parallel, bounded by `workers`
async fn serve_nats(
    mut subscription: async_nats::Subscriber,
    service: Arc<RiskService>,
    publisher: ReplyPublisher,
    workers: usize,
) {
    let semaphore = Arc::new(Semaphore::new(workers));

    while let Some(message) = subscription.next().await {
        let Some(reply_to) = message.reply.clone() else {
            warn!(subject = %message.subject, "Dropping assessment request without reply subject");
            continue;
        };

        // Acquire permit (limits concurrent tasks)
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let service = service.clone();
        let publisher = publisher.clone();

        tokio::spawn(async move {
            let payload = message.payload;
            match tokio::task::spawn_blocking(move || respond(&service, &payload)).await {
                Ok(reply) => {
                    if let Err(e) = publisher.publish(reply_to, &reply).await {
                        error!(error = %e, "Failed to publish assessment reply");
                    }
                }
                Err(e) => error!(error = %e, "Assessment task failed"),
            }

            drop(permit);
        });
    }

    info!("NATS subscription closed");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
