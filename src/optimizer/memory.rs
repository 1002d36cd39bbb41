//! Memory admission for precomputation-heavy candidates.
//!
//! The distance matrix and the kNN preprocessor trade O(n²) build cost and
//! substantial residency for fast identifier-based queries. Before building
//! either, the optimizer estimates the allocation and admits it only if it
//! fits within 80% of the available budget, logging a warning otherwise and
//! moving on to the next candidate.

use tracing::warn;

const MEGA: u64 = 1024 * 1024;

/// Where the admission limit comes from.
#[derive(Debug, Clone, Copy)]
pub enum MemoryBudget {
    /// Ask the operating system for currently available memory.
    System,
    /// A fixed number of bytes, mainly for tests and embedded callers.
    Fixed(u64),
}

impl Default for MemoryBudget {
    fn default() -> Self {
        MemoryBudget::System
    }
}

impl MemoryBudget {
    /// Bytes available for index construction.
    pub fn available_bytes(&self) -> u64 {
        match self {
            MemoryBudget::Fixed(bytes) => *bytes,
            MemoryBudget::System => system_available(),
        }
    }

    /// Decide whether an allocation of `cost` bytes for `what` is admitted.
    ///
    /// Rejections are logged at warn level with human-readable sizes.
    pub(crate) fn admit(&self, what: &str, cost: u64) -> bool {
        let available = self.available_bytes();
        if cost > available / 10 * 8 {
            warn!(
                "Not building a {} because it may not fit into memory: need {}, available {}",
                what,
                format_memory(cost),
                format_memory(available)
            );
            return false;
        }
        true
    }
}

#[cfg(target_os = "linux")]
fn system_available() -> u64 {
    // MemAvailable accounts for reclaimable caches, unlike MemFree.
    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemAvailable:") {
                if let Some(kb) = rest
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    return kb * 1024;
                }
            }
        }
    }
    1024 * MEGA
}

#[cfg(not(target_os = "linux"))]
fn system_available() -> u64 {
    // No portable equivalent of MemAvailable; assume a conservative 1 GiB.
    1024 * MEGA
}

/// Bytes needed for an n×n single-precision distance matrix.
pub(crate) fn matrix_cost(n: usize) -> u64 {
    4 * n as u64 * n as u64
}

/// Bytes needed to materialize `max_k` neighbors for each of `n` records.
pub(crate) fn knn_preprocessor_cost(max_k: usize, n: usize) -> u64 {
    12 * max_k as u64 * n as u64
}

/// Render a byte count with one truncated decimal, in mebibytes below
/// 2500 MiB and gibibytes above.
pub(crate) fn format_memory(bytes: u64) -> String {
    if bytes < 2500 * MEGA {
        let tenths = bytes * 10 / MEGA;
        format!("{}.{}M", tenths / 10, tenths % 10)
    } else {
        let tenths = bytes * 10 / (1024 * MEGA);
        format!("{}.{}G", tenths / 10, tenths % 10)
    }
}
