use crate::error::{ScanError, ScanResult};

pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 10;
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 10_000;
pub const DEFAULT_CHUNK_SIZE_INCREASE_FACTOR: f64 = 2.0;

/// Picks the block span of the next `eth_getLogs` window.
///
/// Empty windows grow the span geometrically so sparse history is crossed quickly. Any hit
/// drops straight back to the minimum to keep per-chunk work small near activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSizeEstimator {
    min_chunk_size: u64,
    max_chunk_size: u64,
    increase_factor: f64,
}

impl Default for ChunkSizeEstimator {
    fn default() -> Self {
        Self {
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            increase_factor: DEFAULT_CHUNK_SIZE_INCREASE_FACTOR,
        }
    }
}

impl ChunkSizeEstimator {
    pub fn new(min_chunk_size: u64, max_chunk_size: u64, increase_factor: f64) -> ScanResult<Self> {
        if min_chunk_size == 0 {
            return Err(ScanError::InvalidConfig(
                "min_chunk_size must be greater than 0".to_string(),
            ));
        }
        if min_chunk_size > max_chunk_size {
            return Err(ScanError::InvalidConfig(format!(
                "min_chunk_size {min_chunk_size} exceeds max_chunk_size {max_chunk_size}"
            )));
        }
        if !increase_factor.is_finite() || increase_factor < 1.0 {
            return Err(ScanError::InvalidConfig(format!(
                "chunk_size_increase_factor must be at least 1.0, got {increase_factor}"
            )));
        }

        Ok(Self {
            min_chunk_size,
            max_chunk_size,
            increase_factor,
        })
    }

    pub fn min_chunk_size(&self) -> u64 {
        self.min_chunk_size
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    pub fn next_size(&self, current_size: u64, events_found: usize) -> u64 {
        let next = if events_found > 0 {
            self.min_chunk_size
        } else {
            // f64 -> u64 casts saturate
            (current_size as f64 * self.increase_factor) as u64
        };

        self.clamp(next)
    }

    pub fn clamp(&self, size: u64) -> u64 {
        size.clamp(self.min_chunk_size, self.max_chunk_size)
    }
}
