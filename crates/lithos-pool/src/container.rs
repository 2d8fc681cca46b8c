//! Per-container bookkeeping: member footprints, counters, caps, fidelity.

use hashbrown::HashMap;
use lithos_mesh::{ChunkKey, Fidelity, GeometryStats};
use lithos_sink::{ColorId, ContainerHandle, FaceHandle};

/// Index of a pooled container within the registry's slot vector.
pub type ContainerId = usize;

/// Triangle/vertex caps shared by every container in a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caps {
    pub tris: u32,
    pub verts: u32,
}

impl Caps {
    /// Whether a footprint could fit an empty container at all; anything
    /// larger is refused before placement is even attempted.
    #[inline]
    pub fn admits(self, needed: GeometryStats) -> bool {
        needed.tris <= self.tris && needed.verts <= self.verts
    }
}

/// What one chunk occupies inside a container.
#[derive(Clone, Debug)]
pub struct MemberFootprint {
    pub faces: Vec<FaceHandle>,
    pub tris: u32,
    pub verts: u32,
    pub fidelity: Option<Fidelity>,
}

impl MemberFootprint {
    #[inline]
    pub fn is_scarce(&self) -> bool {
        self.fidelity.is_some_and(|f| f.is_scarce())
    }

    #[inline]
    pub fn stats(&self) -> GeometryStats {
        GeometryStats {
            tris: self.tris,
            verts: self.verts,
        }
    }
}

/// One geometry container and the bookkeeping the pool keeps for it.
///
/// `tri_count`/`vert_count` mirror the sum over `members`; any suspicion of
/// drift is resolved by `recount`, never by trusting the running totals.
pub struct ContainerSlot {
    pub handle: ContainerHandle,
    pub members: HashMap<ChunkKey, MemberFootprint>,
    pub tri_count: u32,
    pub vert_count: u32,
    pub scarce_members: u32,
    /// Highest fidelity among members; `None` when empty or undeclared.
    pub fidelity: Option<Fidelity>,
    pub dirty: bool,
    pub queued: bool,
    pub attached: bool,
    /// Colors already registered with the adapter, by quantized rgba.
    pub color_table: HashMap<[u8; 4], ColorId>,
}

impl ContainerSlot {
    pub fn new(handle: ContainerHandle) -> Self {
        Self {
            handle,
            members: HashMap::new(),
            tri_count: 0,
            vert_count: 0,
            scarce_members: 0,
            fidelity: None,
            dirty: false,
            queued: false,
            attached: false,
            color_table: HashMap::new(),
        }
    }

    /// Capacity check against fixed caps; pure, no side effects.
    #[inline]
    pub fn has_room(&self, needed: GeometryStats, caps: Caps) -> bool {
        self.tri_count + needed.tris <= caps.tris && self.vert_count + needed.verts <= caps.verts
    }

    /// Would `needed` fit if `key`'s current footprint were gone? Used to
    /// prefer in-place replacement over relocation. Saturating so a drifted
    /// counter cannot wrap the arithmetic.
    pub fn has_room_without(&self, key: ChunkKey, needed: GeometryStats, caps: Caps) -> bool {
        let old = self
            .members
            .get(&key)
            .map(|m| m.stats())
            .unwrap_or_default();
        self.tri_count.saturating_sub(old.tris) + needed.tris <= caps.tris
            && self.vert_count.saturating_sub(old.verts) + needed.verts <= caps.verts
    }

    /// Scarce-slot check for the same hypothetical swap.
    pub fn scarce_room_without(&self, key: ChunkKey, limit: u32) -> bool {
        let freed = self
            .members
            .get(&key)
            .map(|m| m.is_scarce() as u32)
            .unwrap_or(0);
        self.scarce_members.saturating_sub(freed) < limit
    }

    /// Recompute every derived counter from the authoritative member list.
    /// Idempotent; the answer to any counter-drift suspicion.
    pub fn recount(&mut self) {
        self.tri_count = self.members.values().map(|m| m.tris).sum();
        self.vert_count = self.members.values().map(|m| m.verts).sum();
        self.scarce_members = self.members.values().filter(|m| m.is_scarce()).count() as u32;
        self.recompute_fidelity();
    }

    /// Effective fidelity is the maximum rank among members, `None` if no
    /// member declares one. O(members), idempotent.
    pub fn recompute_fidelity(&mut self) {
        self.fidelity = self.members.values().filter_map(|m| m.fidelity).max();
    }

    pub fn insert_member(&mut self, key: ChunkKey, fp: MemberFootprint) {
        if self.members.insert(key, fp).is_some() {
            log::warn!("member {key} overwritten without release; recounting");
        }
        self.recount();
    }

    pub fn remove_member(&mut self, key: ChunkKey) -> Option<MemberFootprint> {
        let fp = self.members.remove(&key);
        self.recount();
        fp
    }

    /// True when the running totals match a fresh recount.
    pub fn counters_consistent(&self) -> bool {
        let tris: u32 = self.members.values().map(|m| m.tris).sum();
        let verts: u32 = self.members.values().map(|m| m.verts).sum();
        let scarce = self.members.values().filter(|m| m.is_scarce()).count() as u32;
        tris == self.tri_count && verts == self.vert_count && scarce == self.scarce_members
    }
}
