mod config;

use config::WorkerConfig;
use std::sync::Arc;
use tome_broker::amqp::AmqpBroker;
use tome_gateway::{GatewayConfig, HttpGateway};
use tome_pipeline::{Orchestrator, PipelineContext};
use tome_store::MongoStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        amqp = %config.amqp_url,
        db = %config.mongodb_db,
        gateway = %config.gateway_url,
        "tome worker starting"
    );

    let store = Arc::new(MongoStore::connect(&config.mongodb_uri, &config.mongodb_db).await?);
    let broker = Arc::new(AmqpBroker::connect(&config.amqp_url).await);
    let gateway = Arc::new(HttpGateway::new(GatewayConfig::new(&config.gateway_url))?);

    let ctx = Arc::new(PipelineContext::new(store, broker, gateway));
    let orchestrator = Orchestrator::new(ctx);

    tracing::info!("worker ready; consuming jobs");
    orchestrator
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "ctrl-c listener failed; running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("worker stopped");
    Ok(())
}
