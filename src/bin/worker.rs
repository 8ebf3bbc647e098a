use ragpipe::{config, logging, worker::DocumentWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config();
    logging::init_tracing();

    let worker = DocumentWorker::connect(config::get_config()).await?;
    worker.run().await;
    Ok(())
}
