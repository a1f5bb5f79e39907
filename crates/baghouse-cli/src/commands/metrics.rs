//! `bagctl metrics`: play a bag back window by window, then dump metrics
//!
//! Consecutive windows are adjacent, so the throughput reports merge into one
//! record per uninterrupted run, the same way a player reading ahead would.

use anyhow::{Context, Result};
use baghouse_core::Time;
use baghouse_observability::exporter;
use baghouse_storage::CollectingSink;
use std::time::Duration;

use crate::config::Config;
use crate::format::Formatter;

pub async fn handle_metrics(
    location: &str,
    topics: Vec<String>,
    window: Duration,
    config: &Config,
    formatter: &Formatter,
) -> Result<()> {
    let sink = CollectingSink::new();
    let (provider, init) = super::open_provider(location, config, formatter, sink.clone()).await?;
    let topics = if topics.is_empty() {
        init.topics.iter().map(|t| t.name.clone()).collect()
    } else {
        topics
    };

    let mut messages = 0;
    let mut problems = 0;
    for (start, end) in windows(init.start, init.end, window) {
        let result = match provider.get_messages(start, end, &topics).await {
            Ok(result) => result,
            Err(e) => {
                provider.close().await;
                return Err(e).with_context(|| format!("Read of [{}, {}] failed", start, end));
            }
        };
        messages += result.messages.len();
        problems += result.problems.len();
        for problem in &result.problems {
            formatter.print_problem(problem);
        }
    }
    provider.close().await;

    tracing::info!(messages, problems, "Playback finished");
    for record in sink.throughput() {
        formatter.print_info(&super::read::summarize(&record));
    }
    print!("{}", exporter::encode_text().context("Failed to encode metrics")?);
    Ok(())
}

/// Split `[start, end]` into adjacent inclusive windows of `window` length.
fn windows(start: Time, end: Time, window: Duration) -> Vec<(Time, Time)> {
    let step = window.max(Duration::from_nanos(1));
    let mut out = Vec::new();
    let mut cursor = start;
    loop {
        let last = cursor
            .saturating_add(step - Duration::from_nanos(1))
            .min(end);
        out.push((cursor, last));
        if last >= end {
            break;
        }
        cursor = last.next_tick();
    }
    out
}
