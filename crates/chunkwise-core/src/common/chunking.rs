//! Chunk arithmetic shared by the splitter and the server.
//!
//! A source of `size` bytes is cut into `ceil(size / chunk_size)` pieces. All
//! chunks are exactly `chunk_size` bytes except possibly the last one. An
//! empty source still produces one (empty) chunk, because chunk 0 is the only
//! carrier of the session metadata.

use crate::Error;
use core::ops::Range;

/// Default chunk size used by the reference client: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Number of chunks needed to carry `size` bytes in pieces of `chunk_size`.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] if `chunk_size` is zero or the chunk
/// count does not fit the protocol's `u32` index space.
pub fn total_chunks(size: u64, chunk_size: u64) -> Result<u32, Error> {
    if chunk_size == 0 {
        return Err(Error::invalid_request("chunk size must be greater than 0"));
    }
    let count = size.div_ceil(chunk_size).max(1);
    u32::try_from(count).map_err(|_| {
        Error::invalid_request(format!(
            "{size} bytes in chunks of {chunk_size} needs {count} chunks, more than the protocol allows"
        ))
    })
}

/// Byte range of chunk `index` within a source of `size` bytes.
///
/// Indices past the end yield an empty range anchored at `size`.
pub fn chunk_range(index: u32, size: u64, chunk_size: u64) -> Range<u64> {
    let start = (index as u64).saturating_mul(chunk_size).min(size);
    let end = start.saturating_add(chunk_size).min(size);
    start..end
}

/// Upload progress after `acknowledged` of `total` chunks, in percent.
pub fn progress_percent(acknowledged: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (acknowledged as f64 / total as f64) * 100.0
}
