//! Geometry container contract and handle types for the chunk pool.
//!
//! The pool core never touches engine storage directly; everything goes
//! through [`GeometrySink`]. A CPU reference implementation lives in
//! [`cpu::CpuSink`] for tests and headless runs.
#![forbid(unsafe_code)]

use lithos_geom::{Aabb, Vec3};
use thiserror::Error;

pub mod cpu;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorId(pub u32);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unknown container {0:?}")]
    UnknownContainer(ContainerHandle),
    #[error("unknown vertex {0:?}")]
    UnknownVertex(VertexHandle),
    #[error("container storage rejected the operation: {0}")]
    Backend(String),
}

/// Flat-array materialization of a container, ready for upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderBlob {
    /// xyz triples, three vertices per face.
    pub positions: Vec<f32>,
    /// Sequential triangle indices into `positions`.
    pub indices: Vec<u32>,
    /// rgba bytes, one per emitted vertex.
    pub colors: Vec<u8>,
    pub bounds: Option<Aabb>,
}

impl RenderBlob {
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Mutable geometry store the pool drives, one instance per process.
///
/// Handles are container-local. `remove_face` is best-effort by contract:
/// callers count a face as removed whether or not the store still knew it.
pub trait GeometrySink {
    fn create_container(&mut self, fixed_capacity: bool) -> Result<ContainerHandle, SinkError>;
    fn add_vertex(
        &mut self,
        container: ContainerHandle,
        position: Vec3,
    ) -> Result<VertexHandle, SinkError>;
    fn add_face(
        &mut self,
        container: ContainerHandle,
        a: VertexHandle,
        b: VertexHandle,
        c: VertexHandle,
    ) -> Result<FaceHandle, SinkError>;
    fn remove_face(&mut self, container: ContainerHandle, face: FaceHandle) -> bool;
    fn add_color(
        &mut self,
        container: ContainerHandle,
        rgb: [f32; 3],
        opacity: f32,
    ) -> Result<ColorId, SinkError>;
    fn set_face_color(&mut self, container: ContainerHandle, face: FaceHandle, color: ColorId);
    /// Expensive full materialization of the container's current geometry.
    fn snapshot(&mut self, container: ContainerHandle) -> Result<RenderBlob, SinkError>;
    /// Cheap in-place touch-up used when a full snapshot fails; best-effort.
    fn refresh(&mut self, container: ContainerHandle);
    /// Compaction hint; the store may drop internal storage no live face uses.
    fn reclaim_unused(&mut self, container: ContainerHandle);
    fn attach(&mut self, container: ContainerHandle);
    fn detach(&mut self, container: ContainerHandle);
    fn destroy(&mut self, container: ContainerHandle);
}
