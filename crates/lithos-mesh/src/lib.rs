//! Chunk geometry model: keys, fidelity classes, options, and footprints.
#![forbid(unsafe_code)]

use lithos_geom::{Aabb, Vec3};
use lithos_palette::{PaletteColor, PaletteConfig};
use std::collections::HashSet;
use thiserror::Error;

/// Stable, externally assigned identity of a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
}

impl ChunkKey {
    #[inline]
    pub const fn new(cx: i32, cy: i32, cz: i32) -> Self {
        Self { cx, cy, cz }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            cx: self.cx + dx,
            cy: self.cy + dy,
            cz: self.cz + dz,
        }
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.cx, self.cy, self.cz)
    }
}

/// Physical-approximation accuracy a chunk may require. Variant order is
/// ascending accuracy; comparisons rely on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fidelity {
    Box,
    Hull,
    Surface,
    Precise,
}

impl Fidelity {
    /// The highest rank is backed by a constrained placement budget.
    #[inline]
    pub fn is_scarce(self) -> bool {
        matches!(self, Fidelity::Precise)
    }
}

/// How faces of a chunk are colored.
#[derive(Clone, Debug, PartialEq)]
pub enum Coloring {
    Solid(PaletteColor),
    Palette(PaletteConfig),
}

impl Default for Coloring {
    fn default() -> Self {
        Coloring::Palette(PaletteConfig::default())
    }
}

/// Per-chunk placement and shading options.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkOptions {
    pub isolated: bool,
    pub fidelity: Option<Fidelity>,
    pub double_sided: bool,
    pub flat_shaded: bool,
    pub coloring: Coloring,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("chunk geometry has no vertices")]
    EmptyVertices,
    #[error("chunk geometry has no triangles")]
    EmptyTriangles,
    #[error("triangle {tri} references vertex {index} out of {count}")]
    IndexOutOfRange { tri: usize, index: u32, count: usize },
}

/// Caller-supplied chunk geometry: a vertex list plus indexed triangles.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkGeometry {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

/// Triangle/vertex cost a chunk will charge against container caps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryStats {
    pub tris: u32,
    pub verts: u32,
}

/// Bit-exact dedup key for a vertex position. Install paths and footprint
/// accounting must agree on this, so both use it.
#[inline]
pub fn position_key(v: Vec3) -> [u32; 3] {
    [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()]
}

impl ChunkGeometry {
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            triangles,
        }
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.vertices.is_empty() {
            return Err(GeometryError::EmptyVertices);
        }
        if self.triangles.is_empty() {
            return Err(GeometryError::EmptyTriangles);
        }
        let count = self.vertices.len();
        for (tri, idxs) in self.triangles.iter().enumerate() {
            for &index in idxs {
                if index as usize >= count {
                    return Err(GeometryError::IndexOutOfRange { tri, index, count });
                }
            }
        }
        Ok(())
    }

    /// Exact footprint this geometry will occupy under `opts`.
    ///
    /// Flat shading gives every source triangle three private vertices (a
    /// mirrored back face shares them); smooth shading dedups referenced
    /// positions bit-exactly. Double-siding doubles the face count only.
    pub fn stats(&self, opts: &ChunkOptions) -> GeometryStats {
        let sides: u32 = if opts.double_sided { 2 } else { 1 };
        let tris = self.triangles.len() as u32 * sides;
        let verts = if opts.flat_shaded {
            self.triangles.len() as u32 * 3
        } else {
            let mut seen: HashSet<[u32; 3]> = HashSet::with_capacity(self.vertices.len());
            for idxs in &self.triangles {
                for &i in idxs {
                    if let Some(v) = self.vertices.get(i as usize) {
                        seen.insert(position_key(*v));
                    }
                }
            }
            seen.len() as u32
        };
        GeometryStats { tris, verts }
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(&self.vertices)
    }
}
