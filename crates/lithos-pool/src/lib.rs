//! Capacity-aware packing of chunk geometry into a bounded container pool.
//!
//! Chunks enter through [`ChunkPool::add_or_replace_chunk`], land in a pooled
//! container chosen by the placement scans (or in a dedicated isolated
//! container), and leave through [`ChunkPool::unload_chunk`]. Containers whose
//! membership changed are rebuilt in bounded batches by [`ChunkPool::flush`].
#![forbid(unsafe_code)]

mod config;
mod container;
mod error;
mod flush;
mod install;
mod registry;

pub use config::PoolConfig;
pub use container::{Caps, ContainerId};
pub use error::PoolError;
pub use flush::{ContainerUpdate, FlushStats, FlushTarget};

use hashbrown::HashMap;
use lithos_mesh::{ChunkGeometry, ChunkKey, ChunkOptions, Coloring, Fidelity, GeometryStats};
use lithos_palette::Colorer;
use lithos_sink::GeometrySink;

use crate::container::ContainerSlot;
use crate::flush::FlushScheduler;
use crate::install::install_geometry;
use crate::registry::PoolRegistry;

/// Where a chunk's geometry currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkLocation {
    Pooled(ContainerId),
    Isolated,
}

/// Result of a successful add-or-replace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Pooled(ContainerId),
    /// `reused` is true when an existing isolated container with a matching
    /// fidelity class was kept instead of rebuilding its geometry.
    Isolated { reused: bool },
}

#[derive(Clone, Copy, Debug)]
struct ChunkRecord {
    location: ChunkLocation,
    stats: GeometryStats,
    fidelity: Option<Fidelity>,
}

/// Index readout for one chunk.
#[derive(Clone, Copy, Debug)]
pub struct ChunkInfo {
    pub location: ChunkLocation,
    pub stats: GeometryStats,
    pub fidelity: Option<Fidelity>,
}

/// Per-container readout for diagnostics overlays and tests.
#[derive(Clone, Debug)]
pub struct ContainerCounters {
    pub id: ContainerId,
    pub tris: u32,
    pub verts: u32,
    pub members: usize,
    pub scarce_members: u32,
    pub fidelity: Option<Fidelity>,
    pub dirty: bool,
}

#[derive(Clone, Debug, Default)]
pub struct PoolStats {
    pub containers: Vec<ContainerCounters>,
    pub chunks: usize,
    pub isolated_total: usize,
    pub isolated_detached: usize,
    pub queue_depth: usize,
    pub total_tris: u64,
    pub total_verts: u64,
}

/// The container pool: placement, index, isolated storage, flush batching.
///
/// Single logical thread of control; the only deferred work is the flush
/// tick, which the owner drives explicitly.
pub struct ChunkPool {
    cfg: PoolConfig,
    registry: PoolRegistry,
    isolated: HashMap<ChunkKey, ContainerSlot>,
    index: HashMap<ChunkKey, ChunkRecord>,
    scheduler: FlushScheduler,
}

impl ChunkPool {
    pub fn new(cfg: PoolConfig) -> Self {
        let cfg = cfg.normalized();
        let registry = PoolRegistry::new(&cfg);
        let scheduler = FlushScheduler::new(cfg.apply_per_tick);
        Self {
            cfg,
            registry,
            isolated: HashMap::new(),
            index: HashMap::new(),
            scheduler,
        }
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    #[inline]
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.index.contains_key(&key)
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }

    pub fn locate(&self, key: ChunkKey) -> Option<ChunkLocation> {
        self.index.get(&key).map(|r| r.location)
    }

    /// Index readout for one chunk: where it lives and what it charges.
    pub fn chunk_info(&self, key: ChunkKey) -> Option<ChunkInfo> {
        self.index.get(&key).map(|r| ChunkInfo {
            location: r.location,
            stats: r.stats,
            fidelity: r.fidelity,
        })
    }

    /// Install or replace a chunk's geometry under `key`.
    ///
    /// Invalid geometry is rejected before any side effect. A capacity or
    /// adapter failure leaves the previous placement intact when possible;
    /// when an in-place replacement already tore the old footprint down, the
    /// key ends up absent instead.
    pub fn add_or_replace_chunk<S: GeometrySink>(
        &mut self,
        sink: &mut S,
        key: ChunkKey,
        geometry: &ChunkGeometry,
        opts: &ChunkOptions,
    ) -> Result<Placement, PoolError> {
        geometry.validate()?;
        self.registry.ensure_containers(sink)?;

        let needed = geometry.stats(opts);
        if !self.registry.caps().admits(needed) {
            log::warn!(
                "chunk {key} needs {}t/{}v, beyond the per-container caps",
                needed.tris,
                needed.verts
            );
            return Err(PoolError::CapacityExhausted {
                tris: needed.tris,
                verts: needed.verts,
            });
        }

        if opts.isolated {
            self.place_isolated(sink, key, geometry, opts, needed)
        } else {
            self.place_pooled(sink, key, geometry, opts, needed)
        }
    }

    /// Remove a chunk's storage. Idempotent; `false` when nothing was there.
    /// Pooled footprints are released face by face; isolated containers are
    /// detached but kept for a possible matching re-add.
    pub fn unload_chunk<S: GeometrySink>(&mut self, sink: &mut S, key: ChunkKey) -> bool {
        let Some(rec) = self.index.get(&key).copied() else {
            log::debug!("unload {key}: nothing to remove");
            return false;
        };
        match rec.location {
            ChunkLocation::Pooled(id) => {
                self.release_pooled_member(sink, key, id);
            }
            ChunkLocation::Isolated => {
                if let Some(slot) = self.isolated.get_mut(&key) {
                    sink.detach(slot.handle);
                    slot.attached = false;
                    log::debug!("isolated container for {key} detached");
                }
            }
        }
        self.index.remove(&key);
        true
    }

    /// One flush tick: rebuild up to `apply_per_tick` dirty containers and
    /// return their snapshots for presentation.
    pub fn flush<S: GeometrySink>(&mut self, sink: &mut S) -> (Vec<ContainerUpdate>, FlushStats) {
        self.scheduler
            .tick(&mut self.registry, &mut self.isolated, sink)
    }

    /// Destroy isolated containers that were detached and never reattached.
    /// Returns how many were reclaimed.
    pub fn evict_detached<S: GeometrySink>(&mut self, sink: &mut S) -> usize {
        let stale: Vec<ChunkKey> = self
            .isolated
            .iter()
            .filter(|(_, s)| !s.attached)
            .map(|(k, _)| *k)
            .collect();
        for key in &stale {
            self.teardown_isolated(sink, *key);
        }
        stale.len()
    }

    pub fn stats(&self) -> PoolStats {
        let containers: Vec<ContainerCounters> = self
            .registry
            .slots
            .iter()
            .enumerate()
            .map(|(id, s)| ContainerCounters {
                id,
                tris: s.tri_count,
                verts: s.vert_count,
                members: s.members.len(),
                scarce_members: s.scarce_members,
                fidelity: s.fidelity,
                dirty: s.dirty,
            })
            .collect();
        let total_tris = containers.iter().map(|c| u64::from(c.tris)).sum::<u64>()
            + self
                .isolated
                .values()
                .map(|s| u64::from(s.tri_count))
                .sum::<u64>();
        let total_verts = containers.iter().map(|c| u64::from(c.verts)).sum::<u64>()
            + self
                .isolated
                .values()
                .map(|s| u64::from(s.vert_count))
                .sum::<u64>();
        PoolStats {
            containers,
            chunks: self.index.len(),
            isolated_total: self.isolated.len(),
            isolated_detached: self.isolated.values().filter(|s| !s.attached).count(),
            queue_depth: self.scheduler.queue_depth(),
            total_tris,
            total_verts,
        }
    }

    /// True when every container's running totals match a fresh recount of
    /// its member list.
    pub fn counters_consistent(&self) -> bool {
        self.registry.slots.iter().all(|s| s.counters_consistent())
            && self.isolated.values().all(|s| s.counters_consistent())
    }

    fn place_pooled<S: GeometrySink>(
        &mut self,
        sink: &mut S,
        key: ChunkKey,
        geometry: &ChunkGeometry,
        opts: &ChunkOptions,
        needed: GeometryStats,
    ) -> Result<Placement, PoolError> {
        // A mode switch never mutates in place: isolated storage for this
        // key, live or cached, goes away before pooled placement.
        if self.index.get(&key).map(|r| r.location) == Some(ChunkLocation::Isolated) {
            self.index.remove(&key);
        }
        if self.isolated.contains_key(&key) {
            self.teardown_isolated(sink, key);
        }

        let scarce = opts.fidelity.is_some_and(|f| f.is_scarce());
        let colorer = colorer_for(&opts.coloring);

        if let Some(rec) = self.index.get(&key).copied() {
            let ChunkLocation::Pooled(cur) = rec.location else {
                unreachable!("isolated records were cleared above");
            };
            let caps = self.registry.caps();
            let slot = &self.registry.slots[cur];
            let scarce_ok = !scarce
                || (cur < self.registry.reserved_prefix()
                    && slot.scarce_room_without(key, self.registry.scarce_limit()));
            if slot.has_room_without(key, needed, caps) && scarce_ok {
                // In-place replacement: the old footprint must go first to
                // free its room. From here a failure leaves the key absent.
                self.release_pooled_member(sink, key, cur);
                self.index.remove(&key);
                let placed = self.install_pooled(sink, cur, key, geometry, opts, needed, &colorer)?;
                self.finish_pooled(key, placed, needed, opts);
                return Ok(Placement::Pooled(placed));
            }

            // Relocation: the new copy is installed before the old footprint
            // is released, so failure keeps the previous placement.
            let target = if scarce {
                self.registry.find_scarce(needed)
            } else {
                self.registry.find_ordinary(needed)
            };
            let Some(target) = target else {
                log::warn!("no container can take relocated chunk {key}");
                return Err(PoolError::CapacityExhausted {
                    tris: needed.tris,
                    verts: needed.verts,
                });
            };
            let placed = self.install_pooled(sink, target, key, geometry, opts, needed, &colorer)?;
            self.release_pooled_member(sink, key, cur);
            self.index.remove(&key);
            self.finish_pooled(key, placed, needed, opts);
            return Ok(Placement::Pooled(placed));
        }

        let chosen = if scarce {
            self.registry.find_scarce(needed)
        } else {
            self.registry.find_ordinary(needed)
        };
        let Some(chosen) = chosen else {
            log::warn!(
                "no container has room for chunk {key} ({}t/{}v)",
                needed.tris,
                needed.verts
            );
            return Err(PoolError::CapacityExhausted {
                tris: needed.tris,
                verts: needed.verts,
            });
        };
        let placed = self.install_pooled(sink, chosen, key, geometry, opts, needed, &colorer)?;
        self.finish_pooled(key, placed, needed, opts);
        Ok(Placement::Pooled(placed))
    }

    /// The install retry ladder: attempt the chosen container, self-heal its
    /// counters and retry once, then try one alternate container.
    #[allow(clippy::too_many_arguments)]
    fn install_pooled<S: GeometrySink>(
        &mut self,
        sink: &mut S,
        first: ContainerId,
        key: ChunkKey,
        geometry: &ChunkGeometry,
        opts: &ChunkOptions,
        needed: GeometryStats,
        colorer: &Colorer,
    ) -> Result<ContainerId, PoolError> {
        let scarce = opts.fidelity.is_some_and(|f| f.is_scarce());

        let first_err =
            match install_geometry(sink, &mut self.registry.slots[first], geometry, opts, colorer) {
                Ok(fp) => {
                    self.registry.slots[first].insert_member(key, fp);
                    return Ok(first);
                }
                Err(e) => e,
            };
        log::warn!("install into container {first} failed: {first_err}; recounting and retrying");

        let caps = self.registry.caps();
        let slot = &mut self.registry.slots[first];
        slot.recount();
        let mut last_err = first_err;
        if slot.has_room(needed, caps) {
            match install_geometry(sink, slot, geometry, opts, colorer) {
                Ok(fp) => {
                    self.registry.slots[first].insert_member(key, fp);
                    return Ok(first);
                }
                Err(e) => {
                    log::warn!("retry into container {first} failed: {e}");
                    last_err = e;
                }
            }
        }

        let Some(alt) = self.registry.find_other(first, needed, scarce) else {
            return Err(PoolError::Adapter(last_err));
        };
        log::warn!("moving chunk {key} to alternate container {alt}");
        match install_geometry(sink, &mut self.registry.slots[alt], geometry, opts, colorer) {
            Ok(fp) => {
                self.registry.slots[alt].insert_member(key, fp);
                Ok(alt)
            }
            Err(e) => Err(PoolError::Adapter(e)),
        }
    }

    fn finish_pooled(
        &mut self,
        key: ChunkKey,
        id: ContainerId,
        needed: GeometryStats,
        opts: &ChunkOptions,
    ) {
        let slot = &mut self.registry.slots[id];
        self.scheduler.mark(slot, FlushTarget::Pooled(id));
        self.index.insert(
            key,
            ChunkRecord {
                location: ChunkLocation::Pooled(id),
                stats: needed,
                fidelity: opts.fidelity,
            },
        );
    }

    /// Release one pooled member: faces go back to the adapter (stale handles
    /// tolerated), counters drop to the recomputed sum, the container goes
    /// dirty, and a still-heavy container gets a compaction hint.
    fn release_pooled_member<S: GeometrySink>(
        &mut self,
        sink: &mut S,
        key: ChunkKey,
        id: ContainerId,
    ) {
        let slot = &mut self.registry.slots[id];
        let Some(fp) = slot.remove_member(key) else {
            log::warn!("container {id} had no member {key}; recounting");
            slot.recount();
            return;
        };
        for f in &fp.faces {
            if !sink.remove_face(slot.handle, *f) {
                log::debug!("face {f:?} already gone from container {id}");
            }
        }
        self.scheduler.mark(slot, FlushTarget::Pooled(id));
        if slot.vert_count > self.cfg.reclaim_vert_threshold {
            log::debug!(
                "container {id} still holds {} verts after removal; hinting reclaim",
                slot.vert_count
            );
            sink.reclaim_unused(slot.handle);
        }
    }

    fn place_isolated<S: GeometrySink>(
        &mut self,
        sink: &mut S,
        key: ChunkKey,
        geometry: &ChunkGeometry,
        opts: &ChunkOptions,
        needed: GeometryStats,
    ) -> Result<Placement, PoolError> {
        // Mode switch: a pooled copy of this key goes away first.
        if let Some(rec) = self.index.get(&key).copied() {
            if let ChunkLocation::Pooled(id) = rec.location {
                self.release_pooled_member(sink, key, id);
                self.index.remove(&key);
            }
        }

        // An existing isolated container with the same fidelity class is
        // reused as-is, reattaching it if it was detached.
        if let Some(slot) = self.isolated.get_mut(&key) {
            if slot.fidelity == opts.fidelity {
                if !slot.attached {
                    sink.attach(slot.handle);
                    slot.attached = true;
                    if slot.dirty {
                        self.scheduler.mark(slot, FlushTarget::Isolated(key));
                    }
                }
                log::debug!("isolated container for {key} reused");
                let stats = slot.members.get(&key).map(|m| m.stats()).unwrap_or(needed);
                self.index.insert(
                    key,
                    ChunkRecord {
                        location: ChunkLocation::Isolated,
                        stats,
                        fidelity: opts.fidelity,
                    },
                );
                return Ok(Placement::Isolated { reused: true });
            }
            // Fidelity changed: isolated containers are never mutated in
            // place, so the old one is destroyed and a fresh one built.
            self.teardown_isolated(sink, key);
        }

        let handle = sink.create_container(false)?;
        let mut slot = ContainerSlot::new(handle);
        let colorer = colorer_for(&opts.coloring);
        match install_geometry(sink, &mut slot, geometry, opts, &colorer) {
            Ok(fp) => {
                slot.insert_member(key, fp);
                sink.attach(handle);
                slot.attached = true;
                self.scheduler.mark(&mut slot, FlushTarget::Isolated(key));
                self.isolated.insert(key, slot);
                self.index.insert(
                    key,
                    ChunkRecord {
                        location: ChunkLocation::Isolated,
                        stats: needed,
                        fidelity: opts.fidelity,
                    },
                );
                Ok(Placement::Isolated { reused: false })
            }
            Err(e) => {
                // A fresh container has no counter drift to heal; fail fast
                // and give the storage back.
                sink.destroy(handle);
                Err(PoolError::Adapter(e))
            }
        }
    }

    fn teardown_isolated<S: GeometrySink>(&mut self, sink: &mut S, key: ChunkKey) {
        if let Some(slot) = self.isolated.remove(&key) {
            if slot.queued {
                self.scheduler.forget(FlushTarget::Isolated(key));
            }
            sink.destroy(slot.handle);
            log::debug!("isolated container for {key} destroyed");
        }
    }
}

fn colorer_for(coloring: &Coloring) -> Colorer {
    match coloring {
        Coloring::Solid(c) => Colorer::solid(*c),
        Coloring::Palette(cfg) => Colorer::patch(cfg),
    }
}
