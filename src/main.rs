use chrono::Utc;
use kameo::Actor;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use order_progression::actors::{HealthMonitorActor, ReconciliationActor};
use order_progression::domain::order::{
    NewOrder, Order, OrderItem, PaymentInfo, PaymentMethod, RosterDispatcher, ShippingInfo,
};
use order_progression::metrics::{self, Metrics};
use order_progression::store::{InMemoryOrderStore, OrderStore, ScyllaOrderStore};
use order_progression::{AppConfig, ProgressionService, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real environments set variables directly
    let _ = dotenvy::dotenv();

    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_progression=debug"))
        )
        .init();

    tracing::info!("🚀 Starting Order Fulfillment Progression");

    // === 1. Configuration ===
    let config = AppConfig::from_env()?;
    tracing::info!(
        initial_delay_secs = config.progression.initial_delay.as_secs(),
        stage_delay_secs = config.progression.stage_delay.as_secs(),
        sweep_interval_secs = config.progression.sweep_interval.as_secs(),
        dead_letter_threshold = config.progression.dead_letter_threshold,
        "Configuration loaded"
    );

    // === 2. Initialize Prometheus metrics ===
    tracing::info!("Initializing metrics");
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 3. Order store ===
    let store: Arc<dyn OrderStore> = match config.scylla_uri {
        Some(ref uri) => Arc::new(ScyllaOrderStore::connect(uri, &config.keyspace).await?),
        None => {
            tracing::warn!("SCYLLA_URI not set, orders are kept in memory only");
            Arc::new(InMemoryOrderStore::new())
        }
    };

    // === 4. Progression service ===
    let dispatcher = Arc::new(RosterDispatcher::new(RosterDispatcher::default_roster())?);
    let service = ProgressionService::new(
        store.clone(),
        dispatcher,
        Arc::new(SystemClock),
        metrics.clone(),
        &config.progression,
    )?;

    // === 5. Infrastructure actors ===
    let health_monitor = HealthMonitorActor::spawn(
        HealthMonitorActor::new().with_probe(Arc::new(service.scheduler().clone())),
    );
    let reconciler = ReconciliationActor::spawn(
        ReconciliationActor::new(service.scheduler().clone(), config.progression.sweep_interval)
            .with_health_monitor(health_monitor.clone()),
    );

    // Start metrics HTTP server in background thread
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    let monitor_for_http = health_monitor.clone();
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Failed to build metrics runtime: {}", e);
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) =
                metrics::start_metrics_server(metrics_registry, Some(monitor_for_http), metrics_port).await
            {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 6. Demo order ===
    let order = Order::place(demo_order(), Utc::now());
    store.insert(&order).await?;
    tracing::info!(order_id = %order.id, tracking_id = %order.tracking_id, "📝 Demo order placed");

    service.handle_order_placed(order.id).await?;
    tokio::spawn(watch_order(service.clone(), order.id));

    // === 7. Run until Ctrl-C ===
    tracing::info!("⏳ Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    service.scheduler().shutdown();
    let _ = reconciler.stop_gracefully().await;
    let _ = health_monitor.stop_gracefully().await;

    tracing::info!("🎉 Shutdown complete");
    Ok(())
}

/// Poll the demo order the way a storefront would, until it stops moving.
async fn watch_order(service: ProgressionService, order_id: Uuid) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        match service.order_status(order_id).await {
            Ok(snapshot) => {
                tracing::info!(
                    order_id = %order_id,
                    status = %snapshot.status,
                    next_status_update = ?snapshot.next_status_update,
                    "📦 Demo order status"
                );
                if snapshot.status.is_terminal() {
                    tracing::info!(order_id = %order_id, "✅ Demo order finished");
                    return;
                }
            }
            Err(e) => tracing::warn!(order_id = %order_id, error = %e, "Failed to poll demo order"),
        }
    }
}

fn demo_order() -> NewOrder {
    NewOrder {
        items: vec![
            OrderItem {
                product_id: Uuid::new_v4(),
                name: "Mechanical Keyboard".to_string(),
                quantity: 1,
                unit_price_cents: 459_900,
            },
            OrderItem {
                product_id: Uuid::new_v4(),
                name: "USB-C Cable".to_string(),
                quantity: 2,
                unit_price_cents: 29_900,
            },
        ],
        shipping_info: ShippingInfo {
            name: "Priya Nair".to_string(),
            phone: "+91 90000 00000".to_string(),
            address: "12 MG Road".to_string(),
            city: "Bengaluru".to_string(),
            state: "Karnataka".to_string(),
            pincode: "560001".to_string(),
            landmark: Some("Near the metro station".to_string()),
        },
        payment_info: PaymentInfo {
            id: "pay_demo_0001".to_string(),
            method: PaymentMethod::Razorpay,
            status: "succeeded".to_string(),
        },
        total_cents: 519_700,
    }
}
