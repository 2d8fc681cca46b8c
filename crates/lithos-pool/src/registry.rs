//! Pooled container registry and placement scans.

use lithos_mesh::GeometryStats;
use lithos_sink::{GeometrySink, SinkError};

use crate::config::PoolConfig;
use crate::container::{Caps, ContainerId, ContainerSlot};

/// Owns the fixed vector of pooled containers plus the rotating cursor for
/// scarce-class placement. Containers are created lazily on first use so a
/// pool can be constructed before its adapter exists.
pub struct PoolRegistry {
    pub slots: Vec<ContainerSlot>,
    caps: Caps,
    container_count: usize,
    reserved_prefix: usize,
    scarce_limit: u32,
    cursor: usize,
}

impl PoolRegistry {
    pub fn new(cfg: &PoolConfig) -> Self {
        Self {
            slots: Vec::new(),
            caps: Caps {
                tris: cfg.tri_cap,
                verts: cfg.vert_cap,
            },
            container_count: cfg.container_count,
            reserved_prefix: cfg.reserved_prefix,
            scarce_limit: cfg.scarce_per_container,
            cursor: 0,
        }
    }

    #[inline]
    pub fn caps(&self) -> Caps {
        self.caps
    }

    #[inline]
    pub fn scarce_limit(&self) -> u32 {
        self.scarce_limit
    }

    #[inline]
    pub fn reserved_prefix(&self) -> usize {
        self.reserved_prefix
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Create and attach the pooled containers. No-op once initialized.
    pub fn ensure_containers<S: GeometrySink>(&mut self, sink: &mut S) -> Result<(), SinkError> {
        if self.is_initialized() || self.container_count == 0 {
            return Ok(());
        }
        self.slots.reserve(self.container_count);
        for _ in 0..self.container_count {
            let handle = sink.create_container(true)?;
            sink.attach(handle);
            let mut slot = ContainerSlot::new(handle);
            slot.attached = true;
            self.slots.push(slot);
        }
        log::info!(
            "container pool ready: {} containers, caps {}t/{}v, reserved prefix {}",
            self.container_count,
            self.caps.tris,
            self.caps.verts,
            self.reserved_prefix
        );
        Ok(())
    }

    /// First-fit scan over all pooled containers in stable order.
    pub fn find_ordinary(&self, needed: GeometryStats) -> Option<ContainerId> {
        self.slots
            .iter()
            .position(|s| s.has_room(needed, self.caps))
    }

    /// Round-robin scan of the reserved prefix for a highest-fidelity chunk.
    /// A candidate needs capacity room and a free scarce slot. On a hit the
    /// cursor moves past the chosen container so consecutive placements
    /// spread across the prefix.
    pub fn find_scarce(&mut self, needed: GeometryStats) -> Option<ContainerId> {
        let k = self.reserved_prefix.min(self.slots.len());
        if k == 0 {
            return None;
        }
        // The cursor may point past the prefix if configuration shrank it.
        let start = self.cursor % k;
        for i in 0..k {
            let idx = (start + i) % k;
            let slot = &self.slots[idx];
            if slot.has_room(needed, self.caps) && slot.scarce_members < self.scarce_limit {
                self.cursor = (idx + 1) % k;
                return Some(idx);
            }
        }
        None
    }

    /// Rescue scan after a failed install: every other container with room,
    /// still confined to the reserved prefix for scarce chunks.
    pub fn find_other(
        &self,
        exclude: ContainerId,
        needed: GeometryStats,
        scarce: bool,
    ) -> Option<ContainerId> {
        let limit = if scarce {
            self.reserved_prefix.min(self.slots.len())
        } else {
            self.slots.len()
        };
        self.slots[..limit].iter().enumerate().position(|(i, s)| {
            i != exclude
                && s.has_room(needed, self.caps)
                && (!scarce || s.scarce_members < self.scarce_limit)
        })
    }
}
