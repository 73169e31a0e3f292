//! Benchmark utilities for Rusty Streams.
//!
//! This crate provides benchmarking infrastructure for the emitter and the stream
//! machinery, including:
//!
//! - **Microbenchmarks**: Individual emitter operations (emit, subscribe, once)
//! - **Scenario benchmarks**: Realistic data flows (transform chains, fan-out with slow sinks)
//! - **Memory tracking**: Heap cost per chunk delivery via dhat
//! - **Chunk generation**: Seeded, reproducible payloads
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p rusty_bench
//!
//! # Run specific benchmark group
//! cargo bench -p rusty_bench -- emit
//!
//! # Run with memory profiling (slower)
//! cargo bench -p rusty_bench --features memory_profiling
//! ```
//!
//! # Benchmark Results
//!
//! Results are written to `target/criterion/` with HTML reports for visualization.
//! Memory profiling results are written to `dhat-heap.json` for viewing with
//! DHAT's viewer.

pub mod chunks;
pub mod memory;
pub mod scenarios;
