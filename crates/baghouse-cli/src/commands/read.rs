//! `bagctl read`: messages on some topics within a time range

use anyhow::Result;
use baghouse_core::{MessageEvent, Time};
use baghouse_storage::{CollectingSink, ThroughputRecord};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::config::Config;
use crate::format::{format_bytes, Formatter};

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Bag path or http(s) URL
    pub location: String,

    /// Range start as SECONDS[.FRACTION] (default: bag start)
    #[arg(long, value_parser = super::parse_time)]
    pub start: Option<Time>,

    /// Inclusive range end (default: bag end)
    #[arg(long, value_parser = super::parse_time)]
    pub end: Option<Time>,

    /// Topic to read; repeat for several (default: all topics)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Print at most this many messages
    #[arg(short, long)]
    pub limit: Option<usize>,
}

#[derive(Serialize, Tabled)]
struct MessageRow {
    #[tabled(rename = "Receive time")]
    receive_time: String,
    #[tabled(rename = "Topic")]
    topic: String,
    #[tabled(rename = "Bytes")]
    bytes: usize,
}

impl From<&MessageEvent> for MessageRow {
    fn from(message: &MessageEvent) -> Self {
        Self {
            receive_time: message.receive_time.to_string(),
            topic: message.topic.clone(),
            bytes: message.payload.len(),
        }
    }
}

pub async fn handle_read(args: ReadArgs, config: &Config, formatter: &Formatter) -> Result<()> {
    let sink = CollectingSink::new();
    let (provider, init) =
        super::open_provider(&args.location, config, formatter, sink.clone()).await?;

    let start = args.start.unwrap_or(init.start);
    let end = args.end.unwrap_or(init.end);
    let topics = if args.topics.is_empty() {
        init.topics.iter().map(|t| t.name.clone()).collect()
    } else {
        args.topics
    };

    let result = provider.get_messages(start, end, &topics).await;
    provider.close().await;
    let result = result?;

    for problem in &result.problems {
        formatter.print_problem(problem);
    }

    let limit = args.limit.unwrap_or(usize::MAX);
    let rows: Vec<MessageRow> = result
        .messages
        .iter()
        .take(limit)
        .map(MessageRow::from)
        .collect();
    formatter.print_list(rows)?;

    if !formatter.is_structured() {
        if result.messages.len() > limit {
            formatter.print_info(&format!(
                "{} more messages not shown",
                result.messages.len() - limit
            ));
        }
        for record in sink.throughput() {
            formatter.print_info(&summarize(&record));
        }
    }
    Ok(())
}

pub(crate) fn summarize(record: &ThroughputRecord) -> String {
    format!(
        "{} messages, {} in {:.1} ms ({}/s) for [{}, {}]",
        record.message_count,
        format_bytes(record.total_bytes),
        record.transfer_duration.as_secs_f64() * 1000.0,
        format_bytes(record.bytes_per_second() as u64),
        record.start_time,
        record.end_time
    )
}
