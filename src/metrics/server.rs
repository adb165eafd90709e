use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use kameo::actor::ActorRef;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::actors::{GetSystemHealth, HealthMonitorActor, HealthStatus};

struct ServerState {
    registry: Arc<Registry>,
    health_monitor: Option<ActorRef<HealthMonitorActor>>,
}

/// Start the metrics HTTP server
/// This should be called in a separate thread/runtime to avoid conflicts
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    health_monitor: Option<ActorRef<HealthMonitorActor>>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://0.0.0.0:{}/metrics", port);

    let state = web::Data::new(ServerState {
        registry,
        health_monitor,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(state: web::Data<ServerState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<ServerState>) -> impl Responder {
    let Some(ref monitor) = state.health_monitor else {
        return HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "service": "order-progression"
        }));
    };

    match monitor.ask(GetSystemHealth).send().await {
        Ok(health) => {
            let mut response = match health.overall_status {
                HealthStatus::Unhealthy(_) => HttpResponse::ServiceUnavailable(),
                _ => HttpResponse::Ok(),
            };
            response.json(health)
        }
        Err(e) => {
            tracing::error!(error = ?e, "Failed to get system health");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unknown",
                "service": "order-progression"
            }))
        }
    }
}
