//! Realistic data flow benchmark scenarios.
//!
//! These scenarios push representative payloads through complete stream graphs and drive
//! the event loop until everything finished.
//!
//! # Scenarios
//!
//! - **Transform chain**: One source, a pipeline of transforms, one sink
//! - **Fan-out**: One source feeding several sinks, one of which acknowledges late

pub mod chain;
pub mod fan_out;

pub use chain::{ChainConfig, ChainScenario};
pub use fan_out::{FanOutConfig, FanOutScenario};

use std::{cell::Cell, rc::Rc};

use rusty_streams::prelude::*;

/// Common trait for benchmark scenarios.
pub trait Scenario {
    /// Human-readable name of the scenario.
    fn name(&self) -> &'static str;

    /// Brief description of what this scenario tests.
    fn description(&self) -> &'static str;

    /// Number of chunks moved per run.
    fn chunk_count(&self) -> usize;

    /// Stage-to-stage transfers each chunk makes.
    fn hops(&self) -> usize;

    /// Total bytes of the generated payload.
    fn payload_bytes(&self) -> u64;

    /// Set up the scenario (generate payloads).
    fn setup(&mut self);

    /// Build the stream graph, run it to completion and return the bytes delivered.
    fn run(&mut self) -> u64;

    /// Clean up the scenario.
    fn teardown(&mut self);
}

/// A writable that counts delivered bytes and acknowledges at once.
pub(crate) fn counting_sink(tasks: &EventLoop, options: Options) -> (Writable, Rc<Cell<u64>>) {
    let delivered = Rc::new(Cell::new(0));
    let sink = {
        let delivered = delivered.clone();
        Writable::with_consumer(tasks, options, move |chunk: Chunk, ack: Ack| {
            delivered.set(delivered.get() + chunk.len() as u64);
            ack.ok();
        })
    };
    (sink, delivered)
}

/// A writable that acknowledges each chunk on the next loop turn.
pub(crate) fn deferred_sink(tasks: &EventLoop, options: Options) -> (Writable, Rc<Cell<u64>>) {
    let delivered = Rc::new(Cell::new(0));
    let handle = tasks.handle();
    let sink = {
        let delivered = delivered.clone();
        Writable::with_consumer(tasks, options, move |chunk: Chunk, ack: Ack| {
            delivered.set(delivered.get() + chunk.len() as u64);
            handle.defer(move || ack.ok());
        })
    };
    (sink, delivered)
}
