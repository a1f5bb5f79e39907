//! `bagctl fixture`: write a synthetic bag for testing players and readers

use anyhow::{Context, Result};
use baghouse_core::{Compression, Time};
use baghouse_storage::BagWriter;
use bytes::Bytes;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::format::{format_bytes, Formatter};

const STRING_MD5: &str = "992ce8a1687cec8c8bd883ec73ca41d1";
const STRING_DEFINITION: &str = "string data\n";

#[derive(Args, Debug)]
pub struct FixtureArgs {
    /// Output path
    #[arg(id = "output_path", value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Number of topics (/fixture_0, /fixture_1, ...)
    #[arg(long, default_value = "2")]
    pub topics: usize,

    /// Messages per topic
    #[arg(long, default_value = "100")]
    pub messages: u32,

    /// Publish rate per topic in Hz
    #[arg(long, default_value = "10")]
    pub rate: u32,

    /// Chunk compression: none, bz2, lz4
    #[arg(long, default_value = "lz4", value_parser = super::parse_compression)]
    pub compression: Compression,

    /// Uncompressed chunk size threshold in bytes
    #[arg(long, default_value = "786432")]
    pub chunk_size: usize,

    /// Receive time of the first message, SECONDS[.FRACTION]
    #[arg(long, default_value = "1700000000", value_parser = super::parse_time)]
    pub start: Time,
}

/// Build the fixture bag in memory.
pub fn build(args: &FixtureArgs) -> Result<Bytes> {
    let mut writer = BagWriter::new()
        .with_compression(args.compression)
        .with_chunk_threshold(args.chunk_size);
    let connections: Vec<(String, u32)> = (0..args.topics)
        .map(|i| {
            let topic = format!("/fixture_{}", i);
            let conn =
                writer.add_connection(&topic, "std_msgs/String", STRING_MD5, STRING_DEFINITION);
            (topic, conn)
        })
        .collect();

    let period = Duration::from_secs(1) / args.rate.max(1);
    for seq in 0..args.messages {
        let time = args.start.saturating_add(period * seq);
        for (topic, conn) in &connections {
            writer.write_message(*conn, time, &string_message(&format!("{} #{}", topic, seq)))?;
        }
    }
    Ok(writer.finish()?)
}

/// Serialized `std_msgs/String`: u32 length, then the bytes.
fn string_message(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + text.len());
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

pub async fn handle_fixture(args: FixtureArgs, formatter: &Formatter) -> Result<()> {
    let bag = build(&args)?;
    tokio::fs::write(&args.output, &bag)
        .await
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    formatter.print_success(&format!(
        "Wrote {} ({}, {} topics x {} messages, {})",
        args.output.display(),
        format_bytes(bag.len() as u64),
        args.topics,
        args.messages,
        args.compression
    ));
    Ok(())
}
