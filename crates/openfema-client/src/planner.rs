//! Page-count and duration estimation.

use std::fmt;
use std::time::Duration;

/// How many calls a retrieval needs and roughly how long they will take.
///
/// The duration is a best-effort figure extrapolated from one sampled
/// round-trip under current network conditions, not a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalPlan {
    /// Records the retrieval will return
    pub total_records: u64,
    /// Rows per call
    pub page_size: u32,
    /// `ceil(total_records / page_size)`
    pub page_count: u64,
    /// `sampled latency * page_count`
    pub estimated_duration: Duration,
    /// Whether the caller must confirm before any data page is fetched
    pub requires_confirmation: bool,
}

impl RetrievalPlan {
    /// Plan a retrieval of `total_records` in pages of `page_size`.
    ///
    /// `ask_before_call` only matters when more than one page is needed.
    pub fn new(
        total_records: u64,
        page_size: u32,
        sampled_latency: Duration,
        ask_before_call: bool,
    ) -> Self {
        let page_count = page_count(total_records, page_size);
        Self {
            total_records,
            page_size,
            page_count,
            estimated_duration: estimate(sampled_latency, page_count),
            requires_confirmation: page_count > 1 && ask_before_call,
        }
    }

    /// Returns true when there is nothing to fetch.
    pub fn is_empty(&self) -> bool {
        self.page_count == 0
    }

    /// Re-plan the pages left after the first one, using a fresh latency sample.
    ///
    /// Returns `None` unless more than one page remains after the first.
    pub fn remaining_after_first(&self, sampled_latency: Duration) -> Option<Self> {
        if self.page_count <= 2 {
            return None;
        }
        let remaining_records = self
            .total_records
            .saturating_sub(u64::from(self.page_size));
        Some(Self::new(
            remaining_records,
            self.page_size,
            sampled_latency,
            false,
        ))
    }

    /// Number of rows page `index` should request.
    pub fn rows_for_page(&self, index: u64) -> u32 {
        let offset = index * u64::from(self.page_size);
        let left = self.total_records.saturating_sub(offset);
        left.min(u64::from(self.page_size)) as u32
    }
}

impl fmt::Display for RetrievalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records in {} calls of up to {} rows, about {}",
            self.total_records,
            self.page_count,
            self.page_size,
            format_duration(self.estimated_duration)
        )
    }
}

/// `ceil(total_records / page_size)`; zero when either input is zero.
pub fn page_count(total_records: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total_records.div_ceil(u64::from(page_size))
}

fn estimate(sampled_latency: Duration, page_count: u64) -> Duration {
    let pages = u32::try_from(page_count).unwrap_or(u32::MAX);
    sampled_latency.saturating_mul(pages)
}

/// Render a duration as `1h 02m 03s`, `4m 05s` or `6s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else if secs > 0 {
        format!("{}s", seconds)
    } else {
        format!("{}ms", duration.as_millis())
    }
}
