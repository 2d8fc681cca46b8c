//! Synthetic placement churn: noise-built chunk geometry cycled through the
//! pool from the command line.

use fastnoise_lite::{FastNoiseLite, NoiseType};
use lithos_geom::Vec3;
use lithos_mesh::{ChunkGeometry, ChunkKey, ChunkOptions, Coloring, Fidelity};
use lithos_palette::{PaletteColor, PaletteConfig};
use lithos_pool::{ChunkPool, PoolConfig};
use lithos_sink::cpu::CpuSink;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WorkloadParams {
    pub ticks: u32,
    pub radius: i32,
    pub seed: i32,
    pub isolated_every: usize,
    pub precise_every: usize,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        Self {
            ticks: 120,
            radius: 6,
            seed: 1337,
            isolated_every: 23,
            precise_every: 11,
        }
    }
}

/// Grid cells per chunk side; two triangles per cell.
const CELLS: usize = 4;
const CHUNK_SIZE: f32 = 8.0;
const HEIGHT_AMP: f32 = 6.0;

/// Heightfield patch for one chunk key. `salt` perturbs the heights so a
/// replacement genuinely differs from what it replaces.
fn heightfield_chunk(noise: &FastNoiseLite, key: ChunkKey, salt: u32) -> ChunkGeometry {
    let base_x = key.cx as f32 * CHUNK_SIZE;
    let base_z = key.cz as f32 * CHUNK_SIZE;
    let step = CHUNK_SIZE / CELLS as f32;
    let bump = salt as f32 * 0.05;

    let side = CELLS + 1;
    let mut vertices = Vec::with_capacity(side * side);
    for gz in 0..side {
        for gx in 0..side {
            let wx = base_x + gx as f32 * step;
            let wz = base_z + gz as f32 * step;
            let h = noise.get_noise_2d(wx, wz) * HEIGHT_AMP + bump;
            vertices.push(Vec3::new(wx, h, wz));
        }
    }

    let mut triangles = Vec::with_capacity(CELLS * CELLS * 2);
    for gz in 0..CELLS {
        for gx in 0..CELLS {
            let i = (gz * side + gx) as u32;
            let right = i + 1;
            let down = i + side as u32;
            let diag = down + 1;
            triangles.push([i, diag, right]);
            triangles.push([i, down, diag]);
        }
    }
    ChunkGeometry::new(vertices, triangles)
}

fn options_for(index: usize, p: &WorkloadParams) -> ChunkOptions {
    let fidelity = if index % p.precise_every == 0 {
        Some(Fidelity::Precise)
    } else {
        match index % 4 {
            0 => Some(Fidelity::Box),
            1 => Some(Fidelity::Hull),
            2 => Some(Fidelity::Surface),
            _ => None,
        }
    };
    // Rotate through a few biome-ish palettes, with the occasional solid
    // override to exercise both coloring paths.
    let coloring = if index % 5 == 4 {
        Coloring::Solid(PaletteColor::opaque(0.42, 0.39, 0.36))
    } else {
        let hue = match index % 3 {
            0 => [95.0, 135.0],
            1 => [30.0, 45.0],
            _ => [200.0, 220.0],
        };
        Coloring::Palette(PaletteConfig {
            hue,
            patch_seed: index as i32,
            ..PaletteConfig::default()
        })
    };
    ChunkOptions {
        isolated: index > 0 && index % p.isolated_every == 0,
        fidelity,
        double_sided: false,
        flat_shaded: index % 2 == 0,
        coloring,
    }
}

/// All keys within the ring, nearest first so placement fills outward.
fn ring_keys(radius: i32) -> Vec<ChunkKey> {
    let mut keys = Vec::new();
    for cz in -radius..=radius {
        for cx in -radius..=radius {
            keys.push(ChunkKey::new(cx, 0, cz));
        }
    }
    keys.sort_by_key(|k| k.cx * k.cx + k.cz * k.cz);
    keys
}

pub fn run(cfg: PoolConfig, p: WorkloadParams) {
    let mut pool = ChunkPool::new(cfg);
    let mut sink = CpuSink::new();

    let mut noise = FastNoiseLite::with_seed(p.seed);
    noise.set_noise_type(Some(NoiseType::OpenSimplex2));
    noise.set_frequency(Some(0.04));

    let keys = ring_keys(p.radius);
    let per_tick = (keys.len() / p.ticks.max(1) as usize).max(1);
    log::info!(
        "workload: {} chunks over {} ticks ({} per tick), seed {}",
        keys.len(),
        p.ticks,
        per_tick,
        p.seed
    );

    let mut next = 0usize;
    let mut placed: Vec<ChunkKey> = Vec::new();
    let mut failures = 0usize;

    for tick in 0..p.ticks {
        // Stream new chunks in until the whole ring is placed.
        for _ in 0..per_tick {
            if next >= keys.len() {
                break;
            }
            let key = keys[next];
            let opts = options_for(next, &p);
            let geo = heightfield_chunk(&noise, key, 0);
            match pool.add_or_replace_chunk(&mut sink, key, &geo, &opts) {
                Ok(_) => placed.push(key),
                Err(e) => {
                    log::warn!("placing {key} failed: {e}");
                    failures += 1;
                }
            }
            next += 1;
        }

        // Once streaming is done, keep churning: replace one chunk per tick
        // and drop one every ninth tick.
        if next >= keys.len() && !placed.is_empty() {
            let idx = tick as usize % placed.len();
            let key = placed[idx];
            let opts = options_for(idx, &p);
            let geo = heightfield_chunk(&noise, key, tick);
            if let Err(e) = pool.add_or_replace_chunk(&mut sink, key, &geo, &opts) {
                log::warn!("replacing {key} failed: {e}");
                failures += 1;
            }
            if tick % 9 == 0 {
                let gone = placed.remove((tick as usize * 3) % placed.len());
                pool.unload_chunk(&mut sink, gone);
            }
        }

        let (updates, fstats) = pool.flush(&mut sink);
        log::debug!(
            "tick {tick}: rebuilt {} (skipped {}, queue {})",
            updates.len(),
            fstats.skipped,
            fstats.queue_depth
        );
    }

    // Drain whatever is still queued, then drop detached isolated storage.
    let mut guard = 0;
    while pool.stats().queue_depth > 0 && guard < 1000 {
        pool.flush(&mut sink);
        guard += 1;
    }
    let evicted = pool.evict_detached(&mut sink);

    let stats = pool.stats();
    log::info!(
        "done: {} chunks resident, {} placement failures, {} isolated ({} evicted)",
        stats.chunks,
        failures,
        stats.isolated_total,
        evicted
    );
    log::info!(
        "totals: {} tris / {} verts across {} containers, {} snapshots taken",
        stats.total_tris,
        stats.total_verts,
        stats.containers.len(),
        sink.snapshots_taken
    );
    for c in &stats.containers {
        log::info!(
            "container {}: {}t/{}v, {} members ({} scarce), fidelity {:?}{}",
            c.id,
            c.tris,
            c.verts,
            c.members,
            c.scarce_members,
            c.fidelity,
            if c.dirty { ", dirty" } else { "" }
        );
    }
    debug_assert!(pool.counters_consistent());
}
