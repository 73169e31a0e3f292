//! Transform chain benchmark scenario.
//!
//! Simulates a processing pipeline:
//! - A source yielding generated byte chunks
//! - A configurable number of transform stages
//! - A sink counting delivered bytes
//!
//! This scenario tests:
//! - Per-chunk overhead of `"data"` dispatch and write acknowledgement
//! - Backpressure hand-off between stages with small buffers

use rusty_streams::prelude::*;

use crate::chunks::ChunkConfig;
use crate::scenarios::{Scenario, counting_sink};

/// Configuration for the chain benchmark.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chunks: ChunkConfig,
    /// Number of transforms between source and sink.
    pub stages: usize,
    /// Buffer threshold of every stage.
    pub high_water_mark: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chunks: ChunkConfig::default(),
            stages: 4,
            high_water_mark: 16 * 1024,
        }
    }
}

pub struct ChainScenario {
    config: ChainConfig,
    payload: Vec<Chunk>,
}

impl ChainScenario {
    pub fn with_config(config: ChainConfig) -> Self {
        Self {
            config,
            payload: Vec::new(),
        }
    }
}

/// Flips every byte, so each stage touches the data.
fn invert(chunk: Chunk, out: &mut Vec<Chunk>) -> Result<(), StreamError> {
    let data: Vec<u8> = chunk.as_bytes().unwrap_or_default().iter().map(|b| !b).collect();
    out.push(Chunk::from(data));
    Ok(())
}

impl Scenario for ChainScenario {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn description(&self) -> &'static str {
        "source -> N transforms -> sink"
    }

    fn chunk_count(&self) -> usize {
        self.config.chunks.count
    }

    fn hops(&self) -> usize {
        self.config.stages + 1
    }

    fn payload_bytes(&self) -> u64 {
        ChunkConfig::total_bytes(&self.payload)
    }

    fn setup(&mut self) {
        self.payload = self.config.chunks.bytes();
    }

    fn run(&mut self) -> u64 {
        let tasks = EventLoop::new();
        let options = Options::new().with_high_water_mark(self.config.high_water_mark);

        let source = Readable::from_iter(&tasks, self.payload.clone());
        let transforms: Vec<Transform> = (0..self.config.stages)
            .map(|_| Transform::new(&tasks, options, invert))
            .collect();
        let (sink, delivered) = counting_sink(&tasks, options);

        let mut stages: Vec<&dyn AsStream> = Vec::with_capacity(transforms.len() + 2);
        stages.push(&source);
        stages.extend(transforms.iter().map(|t| t as &dyn AsStream));
        stages.push(&sink);

        if pipeline(&stages, |_| {}).is_ok() {
            tasks.run();
        }
        delivered.get()
    }

    fn teardown(&mut self) {
        self.payload.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_reaches_the_sink() {
        let mut scenario = ChainScenario::with_config(ChainConfig {
            chunks: ChunkConfig {
                count: 50,
                ..Default::default()
            },
            stages: 3,
            high_water_mark: 1024,
        });
        scenario.setup();

        let delivered = scenario.run();

        assert_eq!(delivered, scenario.payload_bytes());
    }
}
