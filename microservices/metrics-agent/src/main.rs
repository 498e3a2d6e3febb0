//! Metrics Agent
//!
//! Reports host samples into a Timeplus metrics series and tails a
//! streaming query until ctrl-c or SIGTERM.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use timeplus_client::{QueryCanceller, QueryStream, TimeplusClient};
use timeplus_metrics::MetricsSeries;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod config;

use config::AgentConfig;

const TAG_NAMES: [&str; 3] = ["a", "x", "g"];
const VALUE_NAMES: [&str; 1] = ["value"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    timeplus_telemetry::init("metrics-agent")?;

    let config = AgentConfig::from_env()?;
    let client = Arc::new(TimeplusClient::from_env()?);
    info!(address = %client.config().address, series = %config.metrics_name, "Starting metrics agent");

    let streams = client.list_streams().await.context("listing streams")?;
    info!(count = streams.len(), "Connected to Timeplus");

    let series = MetricsSeries::open(
        &config.metrics_name,
        TAG_NAMES.iter().map(|s| s.to_string()).collect(),
        VALUE_NAMES.iter().map(|s| s.to_string()).collect(),
        client.clone(),
        config.flush_interval,
    )
    .await
    .context("opening metrics series")?;

    let reporter = tokio::spawn(report(series.clone(), config.clone()));

    let tail = match &config.query {
        Some(sql) => {
            let query = client.query_stream(sql, 0, 0).await.context("starting query")?;
            info!(id = %query.metadata.id, sql = %sql, "Tailing query");
            let (stream, canceller, _) = query.into_parts();
            Some((tokio::spawn(tail_query(stream)), canceller))
        }
        None => None,
    };

    wait_for_shutdown().await;
    info!("Shutdown signal received, gracefully stopping...");

    reporter.abort();
    if let Some((handle, canceller)) = tail {
        stop_tail(handle, canceller).await;
    }

    match series.flush().await {
        Ok(rows) => info!(rows, "Final flush complete"),
        Err(e) => warn!(error = %e, "Final flush failed"),
    }
    let stats = series.stats();
    info!(
        flushed_rows = stats.flushed_rows,
        dropped_rows = stats.dropped_rows,
        "Metrics agent stopped"
    );

    Ok(())
}

async fn report(series: MetricsSeries, config: AgentConfig) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(config.report_interval);

    loop {
        ticker.tick().await;
        let elapsed = started.elapsed().as_secs_f64();
        let tags = vec![Some("agent".to_string()), Some(config.metrics_name.clone()), None];
        let value = (elapsed.sin().abs() * 100.0).round();

        if let Err(e) = series.observe("timeplus", "agent", tags, vec![Some(value)], None) {
            error!(error = %e, "Observation rejected");
            break;
        }
    }
}

async fn tail_query(mut stream: QueryStream) -> usize {
    let mut rows = 0;
    while let Some(batch) = stream.next_batch().await {
        match batch {
            Ok(batch) => {
                rows += batch.len();
                for row in &batch {
                    info!(row = ?row, "Query row");
                }
            }
            Err(e) if e.is_recoverable() => warn!(error = %e, "Skipping malformed event"),
            Err(e) => {
                error!(error = %e, "Query stream failed");
                break;
            }
        }
    }
    rows
}

async fn stop_tail(handle: JoinHandle<usize>, canceller: QueryCanceller) {
    canceller.cancel();
    match handle.await {
        Ok(rows) => info!(rows, "Query cancelled"),
        Err(e) => warn!(error = %e, "Query task ended abnormally"),
    }
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
