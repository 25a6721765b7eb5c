use serde::{Deserialize, Serialize};

/// Backend load-shaping heuristic for bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkPolicy {
    /// Target counts above this use `large_batch_size`.
    pub large_batch_threshold: u64,
    pub large_batch_size: usize,
    pub small_batch_size: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            large_batch_threshold: 1000,
            large_batch_size: 50,
            small_batch_size: 10,
        }
    }
}

impl ChunkPolicy {
    pub fn batch_size_for(&self, target_count: u64) -> usize {
        let size = if target_count > self.large_batch_threshold {
            self.large_batch_size
        } else {
            self.small_batch_size
        };
        size.max(1)
    }

    /// Splits `items` into request-sized chunks for their total count.
    pub fn chunks<'a, T>(&self, items: &'a [T]) -> std::slice::Chunks<'a, T> {
        items.chunks(self.batch_size_for(items.len() as u64))
    }
}
