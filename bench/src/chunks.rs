//! Reproducible chunk payloads.
//!
//! Every generator is driven by a seeded [`ChaCha8Rng`] so that runs compare like for like.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rusty_streams::{Chunk, Value};

/// Shape of a generated payload.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Number of chunks.
    pub count: usize,
    /// Smallest byte chunk, inclusive.
    pub min_size: usize,
    /// Largest byte chunk, inclusive.
    pub max_size: usize,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            count: 10_000,
            min_size: 64,
            max_size: 4 * 1024,
            seed: 12345,
        }
    }
}

impl ChunkConfig {
    /// Byte chunks with sizes spread uniformly between the bounds.
    pub fn bytes(&self) -> Vec<Chunk> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let max_size = self.max_size.max(self.min_size);
        (0..self.count)
            .map(|_| {
                let size = rng.gen_range(self.min_size..=max_size);
                let mut data = vec![0u8; size];
                rng.fill(&mut data[..]);
                Chunk::from(data)
            })
            .collect()
    }

    /// Object chunks carrying small records.
    pub fn objects(&self) -> Vec<Chunk> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        (0..self.count)
            .map(|index| {
                Chunk::object(Value::List(vec![
                    Value::from(index as i64),
                    Value::from(rng.gen_range(0.0..1.0f64)),
                    Value::from(rng.gen_bool(0.5)),
                ]))
            })
            .collect()
    }

    /// Total size of [`bytes()`](Self::bytes) output.
    pub fn total_bytes(chunks: &[Chunk]) -> u64 {
        chunks.iter().map(|chunk| chunk.len() as u64).sum()
    }
}
