//! Bag Files
//!
//! - [`BagReader`]: opens a bag through a [`CachedFilelike`](crate::CachedFilelike),
//!   parses its index, and decodes individual chunks on demand
//! - [`BagWriter`]: produces indexed bags (fixtures, conversions, tests)
//!
//! Only the index section and the chunks a caller asks for are ever read.
//! For a bag with chunks of ~768 KiB, answering a one-second query usually
//! costs the 4 KiB header, the index, and one or two chunks.

mod reader;
mod writer;

pub use reader::BagReader;
pub use writer::BagWriter;

use baghouse_core::ChunkInfo;

/// Number of chunks whose start time is earlier than the latest end time
/// of the chunks that start before them.
///
/// Sorted bags have zero overlap; recording with several unsynchronized
/// publishers typically produces a few.
pub fn count_overlapping_chunks(chunks: &[ChunkInfo]) -> usize {
    let mut by_start: Vec<&ChunkInfo> = chunks.iter().collect();
    by_start.sort_by_key(|c| c.start_time);

    let mut overlapping = 0;
    let mut max_end = None;
    for chunk in by_start {
        if let Some(end) = max_end {
            if chunk.start_time < end {
                overlapping += 1;
            }
        }
        max_end = max_end.max(Some(chunk.end_time));
    }
    overlapping
}
