//! Error taxonomy for chunk placement and adapter calls.

use lithos_mesh::GeometryError;
use lithos_sink::SinkError;
use thiserror::Error;

/// Failure of a per-chunk operation. Stale handles during removal are not an
/// error: removals count as done regardless, keeping the pool's counters the
/// source of truth.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no container has room for {tris} triangles / {verts} vertices")]
    CapacityExhausted { tris: u32, verts: u32 },
    #[error("geometry adapter failure: {0}")]
    Adapter(#[from] SinkError),
    #[error("invalid chunk geometry: {0}")]
    InvalidInput(#[from] GeometryError),
}

impl PoolError {
    #[inline]
    pub fn is_capacity(&self) -> bool {
        matches!(self, PoolError::CapacityExhausted { .. })
    }
}
