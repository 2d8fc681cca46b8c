//! Pool configuration, loadable from TOML.

use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::path::Path;

/// Fixed parameters of a container pool. Caps never change after the pool
/// is built.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of pooled (shared) containers.
    pub container_count: usize,
    /// Triangle cap per container.
    pub tri_cap: u32,
    /// Vertex cap per container.
    pub vert_cap: u32,
    /// First N containers are reserved for round-robin placement of the
    /// highest fidelity class.
    pub reserved_prefix: usize,
    /// How many highest-fidelity members one reserved container may hold.
    pub scarce_per_container: u32,
    /// Containers rebuilt per flush tick.
    pub apply_per_tick: usize,
    /// After a removal, a container still holding more vertices than this
    /// gets a compaction hint.
    pub reclaim_vert_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            container_count: 12,
            tri_cap: 15_000,
            vert_cap: 45_000,
            reserved_prefix: 3,
            scarce_per_container: 2,
            apply_per_tick: 4,
            reclaim_vert_threshold: 30_000,
        }
    }
}

impl PoolConfig {
    /// Clamp dependent fields into a usable range. The prefix cannot exceed
    /// the pool and a zero batch size would stall the flush queue forever.
    pub fn normalized(mut self) -> Self {
        if self.reserved_prefix > self.container_count {
            log::warn!(
                "reserved_prefix {} exceeds container_count {}; clamping",
                self.reserved_prefix,
                self.container_count
            );
            self.reserved_prefix = self.container_count;
        }
        if self.apply_per_tick == 0 {
            log::warn!("apply_per_tick 0 would never drain; using 1");
            self.apply_per_tick = 1;
        }
        self
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: PoolConfig = toml::from_str(toml_str)?;
        Ok(cfg.normalized())
    }

    pub fn from_path(path: &Path) -> Result<Self, Box<dyn Error>> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
