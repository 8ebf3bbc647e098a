use ragpipe::{
    answer::RagService, api, aws::AwsCredentials, config, ingest::IngestService, logging,
    metrics::ServiceMetrics,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let credentials = AwsCredentials::from_env()?;
    let metrics = Arc::new(ServiceMetrics::new());
    let ingest = Arc::new(IngestService::connect(config, credentials, metrics.clone()).await?);
    let answer = Arc::new(RagService::connect(config, metrics.clone()).await?);
    let app = api::create_router(ingest, answer, metrics);

    let port = config.server_port.unwrap_or(8000);
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    tracing::info!("Listening on http://0.0.0.0:{port}");
    axum::serve(listener, app).await?;
    Ok(())
}
