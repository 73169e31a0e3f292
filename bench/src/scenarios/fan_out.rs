//! Fan-out benchmark scenario.
//!
//! Simulates one producer feeding several consumers:
//! - A source asking a producer for generated chunks
//! - Several sinks acknowledging at once
//! - One sink acknowledging on the next loop turn
//!
//! This scenario tests:
//! - Pause and resume churn when the slowest destination sets the pace
//! - Drain bookkeeping across destinations

use std::{cell::Cell, rc::Rc};

use rusty_streams::prelude::*;

use crate::chunks::ChunkConfig;
use crate::scenarios::{Scenario, counting_sink, deferred_sink};

/// Configuration for the fan-out benchmark.
#[derive(Debug, Clone)]
pub struct FanOutConfig {
    pub chunks: ChunkConfig,
    /// Number of destinations, including the slow one.
    pub sinks: usize,
    /// Buffer threshold of every stream.
    pub high_water_mark: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            chunks: ChunkConfig::default(),
            sinks: 4,
            high_water_mark: 16 * 1024,
        }
    }
}

pub struct FanOutScenario {
    config: FanOutConfig,
    payload: Rc<Vec<Chunk>>,
}

impl FanOutScenario {
    pub fn with_config(config: FanOutConfig) -> Self {
        Self {
            config,
            payload: Rc::default(),
        }
    }
}

impl Scenario for FanOutScenario {
    fn name(&self) -> &'static str {
        "fan_out"
    }

    fn description(&self) -> &'static str {
        "source -> N sinks, one acknowledging late"
    }

    fn chunk_count(&self) -> usize {
        self.config.chunks.count
    }

    fn hops(&self) -> usize {
        self.config.sinks.max(1)
    }

    fn payload_bytes(&self) -> u64 {
        ChunkConfig::total_bytes(&self.payload)
    }

    fn setup(&mut self) {
        self.payload = Rc::new(self.config.chunks.bytes());
    }

    fn run(&mut self) -> u64 {
        let tasks = EventLoop::new();
        let options = Options::new().with_high_water_mark(self.config.high_water_mark);

        let payload = self.payload.clone();
        let next = Cell::new(0);
        let source = Readable::with_producer(&tasks, options, move |_size: usize, stream: &Readable| {
            loop {
                let index = next.get();
                let Some(chunk) = payload.get(index) else {
                    stream.push(None);
                    return;
                };
                next.set(index + 1);
                if !stream.push(Some(chunk.clone())) {
                    return;
                }
            }
        });

        // Pipes only hold weak references, so the sinks live here until the run is over.
        let (slow, slow_delivered) = deferred_sink(&tasks, options);
        let mut sinks = vec![source.pipe(&slow)];
        let mut totals = vec![slow_delivered];
        for _ in 1..self.config.sinks.max(1) {
            let (sink, delivered) = counting_sink(&tasks, options);
            sinks.push(source.pipe(&sink));
            totals.push(delivered);
        }

        tasks.run();
        drop(sinks);
        totals.iter().map(|delivered| delivered.get()).sum()
    }

    fn teardown(&mut self) {
        self.payload = Rc::default();
    }
}
