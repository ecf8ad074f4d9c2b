//! Synthetic Batch Generator
//!
//! Writes a seeded synthetic batch to a JSON file so it can be re-run through
//! the pipeline's file source.

use tracing::info;
use transaction_flagging_pipeline::source::{persist_batch, SyntheticSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("generate_batch=info".parse()?),
        )
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let path = args.get(1).map(|s| s.as_str()).unwrap_or("data/batch.json");
    let count: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(200);
    let seed: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(7);
    let suspicious_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.0);

    info!(
        path = %path,
        count = count,
        seed = seed,
        suspicious_rate = suspicious_rate,
        "Configuration loaded"
    );

    let batch = SyntheticSource::new(count, seed)
        .with_suspicious_rate(suspicious_rate)
        .generate();

    persist_batch(path, &batch).await?;

    info!("Wrote {} transactions to {}", batch.len(), path);
    Ok(())
}
