//! `bagctl info`: time range, topics, and problems of a bag

use anyhow::Result;
use baghouse_storage::TracingSink;
use serde::Serialize;
use std::sync::Arc;
use tabled::Tabled;

use crate::config::Config;
use crate::format::{format_bytes, Formatter};

#[derive(Serialize, Tabled)]
struct TopicRow {
    #[tabled(rename = "Topic")]
    name: String,
    #[tabled(rename = "Type")]
    datatype: String,
    #[tabled(rename = "Messages")]
    messages: u64,
}

pub async fn handle_info(location: &str, config: &Config, formatter: &Formatter) -> Result<()> {
    let (provider, init) =
        super::open_provider(location, config, formatter, Arc::new(TracingSink)).await?;

    if formatter.is_structured() {
        formatter.print_document(&init)?;
    } else {
        let duration = init.end.saturating_duration_since(init.start);
        let total: u64 = init.topics.iter().map(|t| t.num_messages).sum();
        let mut pairs = vec![
            ("Location", location.to_string()),
            ("Start", init.start.to_string()),
            ("End", init.end.to_string()),
            ("Duration", format!("{:.3}s", duration.as_secs_f64())),
            ("Messages", total.to_string()),
            ("Connections", init.connections.len().to_string()),
        ];
        if let Some(stats) = provider.cache_stats().await {
            pairs.push(("Index bytes cached", format_bytes(stats.current_size)));
        }
        formatter.print_key_value(&pairs);
        println!();

        let rows = init
            .topics
            .iter()
            .map(|t| TopicRow {
                name: t.name.clone(),
                datatype: t.datatype.clone(),
                messages: t.num_messages,
            })
            .collect();
        formatter.print_list::<TopicRow>(rows)?;
    }

    provider.close().await;
    Ok(())
}
