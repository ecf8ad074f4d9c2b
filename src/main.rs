//! Transaction Flagging Pipeline - Main Entry Point
//!
//! Loads one batch, labels it, writes the CSV tables and optionally publishes
//! suspicion reports to NATS.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transaction_flagging_pipeline::{
    config::{AppConfig, LoggingConfig},
    metrics::BatchSummary,
    sink::{CsvSink, ReportProducer, Sink},
    source, FlaggingPipeline,
};

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Library and binary log under different targets; both follow the configured level
fn log_filter(level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive(format!("transaction_flagging_pipeline={}", level).parse()?)
        .add_directive(format!("{}={}", module_path!(), level).parse()?))
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = log_filter(&logging.level)?;

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Config path from the first argument, else the default file if present
    let config_path = std::env::args().nth(1);
    let (config, loaded_from) = match config_path.as_deref() {
        Some(path) => (AppConfig::load_from_path(path)?, Some(path.to_string())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            (AppConfig::load()?, Some(DEFAULT_CONFIG_PATH.to_string()))
        }
        None => (AppConfig::default(), None),
    };

    init_logging(&config.logging)?;

    info!("Starting Transaction Flagging Pipeline");
    match &loaded_from {
        Some(path) => info!(path = %path, "Configuration loaded"),
        None => warn!("No configuration file found, using defaults"),
    }
    info!(
        "Rules: micro<{:.2}, large>q{:.2}; model: contamination={:.2}, trees={}, seed={}",
        config.pipeline.micro_threshold,
        config.pipeline.large_quantile,
        config.pipeline.contamination,
        config.pipeline.ensemble_size,
        config.pipeline.random_seed
    );

    let pipeline =
        FlaggingPipeline::new(&config.pipeline).context("Invalid pipeline configuration")?;
    let mut source = source::from_config(&config.source);

    let csv_sink = CsvSink::new(
        &config.sink.output_dir,
        &config.sink.all_transactions_file,
        &config.sink.suspicious_transactions_file,
    );

    // The NATS client lives for this run only and is dropped on return
    let report_producer = match &config.sink.nats {
        Some(nats) => {
            let client = async_nats::connect(&nats.url)
                .await
                .with_context(|| format!("Failed to connect to NATS at {}", nats.url))?;
            info!("Connected to NATS at {}", nats.url);
            Some(
                ReportProducer::new(client, &nats.report_subject).with_rule_context(
                    config.pipeline.micro_threshold,
                    config.pipeline.risk_levels.clone(),
                ),
            )
        }
        None => None,
    };

    let mut sinks: Vec<&dyn Sink> = vec![&csv_sink];
    if let Some(producer) = &report_producer {
        sinks.push(producer);
    }

    let run = pipeline.run(source.as_mut(), &sinks).await?;

    let summary = BatchSummary::from_batch(&run.batch);
    summary.print_summary(&run.timings);
    info!(
        "Suspicious transactions: {} saved to {}",
        summary.suspicious,
        csv_sink.suspicious_path().display()
    );
    info!(
        "All transactions saved to {}",
        csv_sink.all_path().display()
    );

    if !run.is_persisted() {
        for failure in &run.sink_failures {
            error!(error = %failure, "Persistence failed");
        }
        anyhow::bail!(
            "{} of {} sinks failed to persist the labeled batch",
            run.sink_failures.len(),
            sinks.len()
        );
    }

    info!("Pipeline finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_covers_binary_target() {
        let filter = log_filter("debug").unwrap().to_string();

        assert_eq!(module_path!(), "flagging_pipeline::tests");
        assert!(filter.contains("transaction_flagging_pipeline=debug"));
        assert!(filter
            .split(',')
            .any(|directive| directive == "flagging_pipeline=debug"));
    }

    #[test]
    fn test_log_filter_rejects_bad_level() {
        assert!(log_filter("loud").is_err());
    }
}
