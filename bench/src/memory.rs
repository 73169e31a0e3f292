//! Heap profiling of scenario runs with dhat.
//!
//! Chunks are reference counted, so moving one through a stage should cost a few small
//! allocations (queue slots, boxed deferred tasks) and no payload copies. [`profile`]
//! runs a scenario once under dhat and reports the cost per chunk delivery, plus how many
//! bytes were allocated for every payload byte that reached a consumer.
//!
//! Profiling needs the global allocator installed by the bench binary and is only active
//! with the feature enabled:
//!
//! ```bash
//! cargo bench -p rusty_bench --features memory_profiling
//! ```
//!
//! Each profiled run also writes `dhat-heap.json`, viewable at
//! <https://nnethercote.github.io/dh_view/dh_view.html>.

use std::fmt;

use crate::scenarios::Scenario;

/// Heap usage of one scenario run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlowMemory {
    pub bytes_allocated: u64,
    pub allocations: u64,
    pub peak_bytes: u64,
    /// Chunks times the stage-to-stage transfers each chunk makes.
    pub deliveries: u64,
    /// Payload bytes that reached the final consumers.
    pub delivered_bytes: u64,
}

impl FlowMemory {
    fn ratio(value: u64, per: u64) -> f64 {
        if per == 0 {
            0.0
        } else {
            value as f64 / per as f64
        }
    }

    pub fn allocations_per_delivery(&self) -> f64 {
        Self::ratio(self.allocations, self.deliveries)
    }

    pub fn bytes_per_delivery(&self) -> f64 {
        Self::ratio(self.bytes_allocated, self.deliveries)
    }

    /// Bytes allocated per delivered payload byte. Stages that rewrite chunks push this
    /// towards the number of stages; pure forwarding keeps it well below one.
    pub fn copy_ratio(&self) -> f64 {
        Self::ratio(self.bytes_allocated, self.delivered_bytes)
    }
}

impl fmt::Display for FlowMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} deliveries: {:.2} allocs / {:.1} bytes each, copy ratio {:.2}, peak {} bytes",
            self.deliveries,
            self.allocations_per_delivery(),
            self.bytes_per_delivery(),
            self.copy_ratio(),
            self.peak_bytes
        )
    }
}

/// Total bytes, total allocations and peak bytes while `f` runs.
#[cfg(feature = "memory_profiling")]
fn heap_usage<R>(f: impl FnOnce() -> R) -> (R, Option<(u64, u64, u64)>) {
    let _profiler = dhat::Profiler::new_heap();
    let result = f();
    let stats = dhat::HeapStats::get();
    let usage = (stats.total_bytes, stats.total_blocks, stats.max_bytes as u64);
    (result, Some(usage))
}

#[cfg(not(feature = "memory_profiling"))]
fn heap_usage<R>(f: impl FnOnce() -> R) -> (R, Option<(u64, u64, u64)>) {
    (f(), None)
}

/// Runs `scenario` once under the heap profiler.
///
/// Returns `None` when built without `memory_profiling`. The scenario must already be set
/// up.
pub fn profile<S>(scenario: &mut S) -> Option<FlowMemory>
where
    S: Scenario + ?Sized,
{
    let (delivered_bytes, usage) = heap_usage(|| scenario.run());
    let (bytes_allocated, allocations, peak_bytes) = usage?;
    Some(FlowMemory {
        bytes_allocated,
        allocations,
        peak_bytes,
        deliveries: (scenario.chunk_count() * scenario.hops()) as u64,
        delivered_bytes,
    })
}
