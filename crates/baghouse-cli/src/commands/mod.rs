//! Command handlers for bagctl
//!
//! - info: bag summary (time range, topics, problems)
//! - read: messages in a time range
//! - metrics: replay a bag in windows and dump Prometheus metrics
//! - fixture: write a synthetic bag

pub mod fixture;
pub mod info;
pub mod metrics;
pub mod read;

pub use fixture::FixtureArgs;
pub use read::ReadArgs;

use anyhow::{Context, Result};
use baghouse_core::{Compression, Time};
use baghouse_storage::{BagDataProvider, BagSource, InitializationResult, MetadataSink};
use std::sync::Arc;

use crate::config::Config;
use crate::format::Formatter;

/// Open a bag and print its initialization problems.
pub(crate) async fn open_provider(
    location: &str,
    config: &Config,
    formatter: &Formatter,
    sink: Arc<dyn MetadataSink>,
) -> Result<(BagDataProvider, InitializationResult)> {
    let provider = BagDataProvider::new(BagSource::parse(location), config.provider.clone());
    let init = provider
        .initialize(sink)
        .await
        .with_context(|| format!("Failed to open bag {}", location))?;
    for problem in &init.problems {
        formatter.print_problem(problem);
    }
    Ok((provider, init))
}

/// Parse `SECONDS[.FRACTION]` into a bag time.
pub fn parse_time(value: &str) -> std::result::Result<Time, String> {
    let (sec, frac) = value.split_once('.').unwrap_or((value, ""));
    let sec: u32 = sec
        .parse()
        .map_err(|_| format!("invalid seconds in '{}'", value))?;

    if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid fraction in '{}' (at most 9 digits)", value));
    }
    let nsec = if frac.is_empty() {
        0
    } else {
        format!("{:0<9}", frac)
            .parse::<u32>()
            .map_err(|_| format!("invalid fraction in '{}'", value))?
    };
    Ok(Time::new(sec, nsec))
}

pub fn parse_compression(value: &str) -> std::result::Result<Compression, String> {
    Compression::from_tag(value)
        .ok_or_else(|| format!("unknown compression '{}' (none, bz2, lz4)", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("12").unwrap(), Time::new(12, 0));
        assert_eq!(parse_time("12.5").unwrap(), Time::new(12, 500_000_000));
        assert_eq!(parse_time("1.000000001").unwrap(), Time::new(1, 1));
        assert!(parse_time("1.0000000001").is_err());
        assert!(parse_time("-1").is_err());
        assert!(parse_time("1.x").is_err());
    }

    #[test]
    fn test_parse_compression() {
        assert_eq!(parse_compression("lz4").unwrap(), Compression::Lz4);
        assert!(parse_compression("zstd").is_err());
    }
}
