//! Tick-driven rebuild batching for dirty containers.

use std::collections::VecDeque;
use std::time::Instant;

use hashbrown::HashMap;
use lithos_mesh::ChunkKey;
use lithos_sink::{GeometrySink, RenderBlob};

use crate::container::{ContainerId, ContainerSlot};
use crate::registry::PoolRegistry;

/// What a queue entry points at: a pooled slot or an isolated container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushTarget {
    Pooled(ContainerId),
    Isolated(ChunkKey),
}

/// A freshly materialized container, handed to whatever presents geometry.
#[derive(Debug)]
pub struct ContainerUpdate {
    pub target: FlushTarget,
    pub blob: RenderBlob,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub rebuilt: usize,
    pub fallbacks: usize,
    pub skipped: usize,
    pub queue_depth: usize,
}

/// Coalesces dirty-marks and drains a bounded batch of rebuilds per tick.
///
/// A container sits in the queue at most once; re-marking while queued is a
/// no-op, and re-marking after this tick popped it lands on the next tick.
pub struct FlushScheduler {
    queue: VecDeque<FlushTarget>,
    apply_per_tick: usize,
}

impl FlushScheduler {
    pub fn new(apply_per_tick: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            apply_per_tick: apply_per_tick.max(1),
        }
    }

    #[inline]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Mark `slot` dirty and enqueue it unless it is already waiting.
    pub fn mark(&mut self, slot: &mut ContainerSlot, target: FlushTarget) {
        slot.dirty = true;
        if !slot.queued {
            slot.queued = true;
            self.queue.push_back(target);
        }
    }

    /// Drop any queued entry for `target`. Needed when a container is
    /// destroyed and its identity may later be recreated; a stale entry must
    /// not double-drain the successor.
    pub fn forget(&mut self, target: FlushTarget) {
        self.queue.retain(|t| *t != target);
    }

    /// One scheduling tick: rebuild up to `apply_per_tick` queued containers.
    ///
    /// Entries whose container is gone or detached are dropped or deferred
    /// without spending batch budget. A failed snapshot falls back to the
    /// adapter's cheap refresh and the full rebuild is retried next tick.
    pub fn tick<S: GeometrySink>(
        &mut self,
        registry: &mut PoolRegistry,
        isolated: &mut HashMap<ChunkKey, ContainerSlot>,
        sink: &mut S,
    ) -> (Vec<ContainerUpdate>, FlushStats) {
        let mut out = Vec::new();
        let mut stats = FlushStats::default();
        let mut budget = self.apply_per_tick;
        // Entries re-queued during this tick stay put until the next one.
        let mut pops = self.queue.len();

        while budget > 0 && pops > 0 {
            pops -= 1;
            let Some(target) = self.queue.pop_front() else {
                break;
            };
            let slot = match target {
                FlushTarget::Pooled(id) => registry.slots.get_mut(id),
                FlushTarget::Isolated(key) => isolated.get_mut(&key),
            };
            let Some(slot) = slot else {
                // Destroyed while queued; nothing left to rebuild.
                log::debug!("flush target {target:?} no longer exists, dropping");
                continue;
            };
            slot.queued = false;
            if !slot.attached {
                // Stays dirty; reattachment re-queues it.
                stats.skipped += 1;
                continue;
            }

            let t0 = Instant::now();
            match sink.snapshot(slot.handle) {
                Ok(blob) => {
                    slot.dirty = false;
                    budget -= 1;
                    stats.rebuilt += 1;
                    log::info!(
                        target: "perf",
                        "ms={} container_rebuild target={:?} tris={}",
                        t0.elapsed().as_millis(),
                        target,
                        blob.triangle_count()
                    );
                    out.push(ContainerUpdate { target, blob });
                }
                Err(e) => {
                    log::warn!("rebuild failed for {target:?}: {e}; using in-place refresh");
                    sink.refresh(slot.handle);
                    budget -= 1;
                    stats.fallbacks += 1;
                    // Still dirty; try the full rebuild again next tick.
                    slot.queued = true;
                    self.queue.push_back(target);
                }
            }
        }

        stats.queue_depth = self.queue.len();
        (out, stats)
    }
}
