use crate::cli::{print_document_table, ClusterArgs};
use crate::config::CliConfig;
use anyhow::{Context, Result};
use monograph_core::{CancelToken, ClusterReport, DocumentFilter, StopReason};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub async fn run(args: ClusterArgs, mut config: CliConfig) -> Result<()> {
    if let Some(max) = args.max_comparisons {
        config.engine.similarity.max_comparisons = max;
    }
    if let Some(secs) = args.timeout {
        config.engine.similarity = config
            .engine
            .similarity
            .with_max_time(Duration::from_secs(secs));
    }

    let engine = Arc::new(config.open_engine()?);
    let mut filter = DocumentFilter::new();
    if let Some(collection) = &args.collection {
        filter = filter.with_collection(collection.clone());
    }

    let cancel = CancelToken::new();
    let mut job = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        let threshold = args.threshold;
        tokio::task::spawn_blocking(move || engine.cluster(filter, threshold, &cancel))
    };

    info!("Clustering… press Ctrl-C to stop with a partial report");
    let report = tokio::select! {
        joined = &mut job => joined.context("clustering task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; waiting for the job to stop");
            cancel.cancel();
            job.await.context("clustering task panicked")??
        }
    };

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_summary(&report);
    for (i, cluster) in report.clusters.iter().enumerate() {
        if cluster.len() < 2 && !args.all {
            continue;
        }
        println!();
        println!("Cluster {} ({} documents)", i + 1, cluster.len());
        let docs = cluster
            .iter()
            .map(|id| engine.get(*id))
            .collect::<monograph_core::Result<Vec<_>>>()?;
        print_document_table(&docs);
    }
    Ok(())
}

fn print_summary(report: &ClusterReport) {
    println!(
        "Threshold {:.2}: {} clusters, {} with more than one document, {} comparisons",
        report.threshold,
        report.clusters.len(),
        report.duplicate_clusters().count(),
        report.comparisons
    );
    if !report.complete {
        let reason = match report.stop_reason {
            Some(StopReason::Cancelled) => "cancelled",
            Some(StopReason::DeadlineExceeded) => "time budget exceeded",
            Some(StopReason::BudgetExhausted) => "comparison budget exhausted",
            None => "stopped",
        };
        println!(
            "INCOMPLETE ({}): {} documents not processed",
            reason,
            report.unprocessed.len()
        );
    }
}
