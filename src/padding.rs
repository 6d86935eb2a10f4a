//! Time-series alignment across locations
//!
//! Locations report pings asynchronously and at different rates. Charts
//! expect every location of a server to hold the same number of samples, so
//! a location that falls behind is padded with placeholder samples that
//! borrow their timestamps from the longest location.

use crate::model::{LocationHistory, PingRet};

/// Compute the samples to append to `location` when `pr` arrives.
///
/// The returned batch holds zero or more padding samples followed by `pr`
/// itself. If the longest location already ends with a sample for the same
/// instant as `pr`, that last slot is not padded toward, since `pr` is the
/// current location's entry for that tick.
pub fn pad_samples(history: &LocationHistory, location: &str, pr: PingRet) -> Vec<PingRet> {
    let mut max_len = 0;
    let mut max_samples: &[PingRet] = &[];

    for samples in history.values() {
        if samples.len() > max_len {
            max_len = samples.len();
            max_samples = samples.as_slice();
        }
    }

    if max_samples.last().is_some_and(|last| last.time == pr.time) {
        max_len -= 1;
    }

    let current_len = history.get(location).map_or(0, Vec::len);

    let mut batch = Vec::with_capacity(max_len.saturating_sub(current_len) + 1);
    batch.extend(
        max_samples
            .iter()
            .take(max_len)
            .skip(current_len)
            .map(|sample| PingRet::padding(sample.time.clone())),
    );
    batch.push(pr);
    batch
}
