use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evidence_trail::anchor::{AnchorScheduler, AnchorService, SchedulerHandle, WitnessRegistry};
use evidence_trail::chain::EventRecorder;
use evidence_trail::config::AppConfig;
use evidence_trail::database::Database;
use evidence_trail::ots::{OtsClient, WitnessPublisher};

#[derive(Clone)]
struct AppState {
    config: AppConfig,
    database: Database,
    scheduler: Option<SchedulerHandle>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evidence_trail=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting evidence trail service");

    let config = AppConfig::load()?;
    info!("Configuration loaded");

    let database = Database::new(&config.database_url).await?;
    info!("Database connected");

    database.run_migrations().await?;
    info!("Database migrations completed");

    // Check the stored chain before accepting new work
    let recorder = EventRecorder::new(database.clone(), config.chain.max_append_retries);
    match recorder.verify_stored_chain().await {
        Ok(status) => info!("{}", status.summary()),
        Err(e) => error!("Stored evidence chain failed verification: {}", e),
    }

    let registry = WitnessRegistry::new(database.clone());
    let publisher = if config.ots.enabled {
        let client = OtsClient::new(config.ots.calendar_url.clone(), config.ots.timeout())?;
        info!("OpenTimestamps witnessing enabled via {}", client.calendar_url());
        Some(WitnessPublisher::new(client, registry))
    } else {
        None
    };

    let mut scheduler = if config.anchor.enabled {
        let mut scheduler = AnchorScheduler::new(
            AnchorService::new(database.clone()),
            publisher,
            config.anchor.clone(),
        );
        scheduler.start().await?;
        Some(scheduler)
    } else {
        info!("Anchor scheduler disabled");
        None
    };

    let state = AppState {
        config: config.clone(),
        database,
        scheduler: scheduler.as_ref().map(AnchorScheduler::handle),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.stop().await;
    }
    info!("Evidence trail service stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "evidence-trail",
        "timestamp": chrono::Utc::now()
    }))
}

async fn status_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let unavailable = |e: evidence_trail::EvidenceError| {
        error!("Status query failed: {}", e);
        (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    };

    let head = state.database.chain_head().await.map_err(unavailable)?;
    let event_count = state.database.event_count().await.map_err(unavailable)?;
    let anchor_count = state.database.anchor_count().await.map_err(unavailable)?;
    let latest_anchor = state.database.latest_anchor().await.map_err(unavailable)?;

    let latest_anchor = latest_anchor.map(|anchor| {
        serde_json::json!({
            "anchor_id": anchor.anchor_id,
            "period_start": anchor.period_start,
            "period_end": anchor.period_end,
            "event_count": anchor.event_count,
            "merkle_root": anchor.merkle_root,
            "integrity": anchor.integrity_status(),
        })
    });

    let scheduler = match &state.scheduler {
        Some(handle) => Some(handle.status().await),
        None => None,
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "evidence-trail",
        "timestamp": chrono::Utc::now(),
        "chain": {
            "head_sequence": head.sequence_number,
            "head_hash": head.payload_hash,
            "event_count": event_count,
        },
        "anchors": {
            "count": anchor_count,
            "latest": latest_anchor,
        },
        "scheduler": scheduler,
        "features": {
            "anchoring": state.config.anchor.enabled,
            "ots": state.config.ots.enabled,
        }
    })))
}
