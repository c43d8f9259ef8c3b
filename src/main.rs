use std::sync::Arc;
use std::time::Duration;

use docvault::extraction::retry::RetryPolicy;
use docvault::extraction::GeminiClient;
use docvault::metrics::PipelineMetrics;
use docvault::processing::ProcessingService;
use docvault::store::DocumentStore;
use docvault::{api, config, logging};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();

    let config = config::get_config();
    let store = Arc::new(DocumentStore::open(&config.database_path).expect("Failed to open store"));
    let extractor = GeminiClient::new(&config.gemini_api_key, &config.gemini_model);
    let retry = match config.extraction_backoff_secs {
        Some(secs) => RetryPolicy::new(RetryPolicy::DEFAULT_MAX_ATTEMPTS, Duration::from_secs(secs)),
        None => RetryPolicy::default(),
    };
    let service = Arc::new(ProcessingService::new(
        store,
        Box::new(extractor),
        retry,
        Arc::new(PipelineMetrics::new()),
    ));

    match Arc::clone(&service).recover_stuck().await {
        Ok(0) => {}
        Ok(count) => tracing::info!(count, "Re-queued stranded documents"),
        Err(err) => tracing::error!(error = %err, "Recovery sweep failed"),
    }

    let app = api::create_router(service);

    let (listener, port) = bind_listener().await.expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.unwrap();
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8100..=8199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8100-8199",
    ))
}
