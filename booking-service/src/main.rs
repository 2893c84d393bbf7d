use booking_service::{config::BookingConfig, services::init_metrics, Application};
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Metrics recorder must exist before anything records
    init_metrics();

    let config = BookingConfig::load()?;
    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        environment = ?config.common.environment,
        storage = ?config.storage,
        "Starting booking service"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
