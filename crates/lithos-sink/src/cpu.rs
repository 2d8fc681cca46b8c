//! In-memory reference sink: flat-array snapshots, face tombstoning, and
//! injectable failures for exercising callers' retry paths.

use hashbrown::{HashMap, HashSet};
use lithos_geom::{Aabb, Vec3};

use crate::{ColorId, ContainerHandle, FaceHandle, GeometrySink, RenderBlob, SinkError, VertexHandle};

#[derive(Default)]
struct CpuContainer {
    #[allow(dead_code)]
    fixed_capacity: bool,
    vertices: HashMap<u32, Vec3>,
    faces: HashMap<u32, [u32; 3]>,
    face_colors: HashMap<u32, u32>,
    colors: Vec<([f32; 3], f32)>,
    next_vertex: u32,
    next_face: u32,
    attached: bool,
}

/// CPU-side [`GeometrySink`] used by tests and the demo workload.
#[derive(Default)]
pub struct CpuSink {
    containers: HashMap<u32, CpuContainer>,
    next_container: u32,
    /// Fail this many upcoming `add_face` calls (drained as they fail).
    pub fail_add_faces: u32,
    /// Fail the `add_face` attempt with this zero-based index (one-shot).
    pub fail_add_face_on: Option<usize>,
    /// Total `add_face` attempts, including failed ones.
    pub add_face_calls: usize,
    /// Containers whose next `snapshot` call fails (sticky until cleared).
    pub fail_snapshots: HashSet<ContainerHandle>,
    pub snapshots_taken: usize,
    pub refreshes: usize,
    pub reclaims: usize,
}

impl CpuSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, c: ContainerHandle) -> Result<&CpuContainer, SinkError> {
        self.containers
            .get(&c.0)
            .ok_or(SinkError::UnknownContainer(c))
    }

    fn get_mut(&mut self, c: ContainerHandle) -> Result<&mut CpuContainer, SinkError> {
        self.containers
            .get_mut(&c.0)
            .ok_or(SinkError::UnknownContainer(c))
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    pub fn is_alive(&self, c: ContainerHandle) -> bool {
        self.containers.contains_key(&c.0)
    }

    pub fn is_attached(&self, c: ContainerHandle) -> bool {
        self.get(c).map(|cc| cc.attached).unwrap_or(false)
    }

    pub fn face_count(&self, c: ContainerHandle) -> usize {
        self.get(c).map(|cc| cc.faces.len()).unwrap_or(0)
    }

    pub fn vertex_count(&self, c: ContainerHandle) -> usize {
        self.get(c).map(|cc| cc.vertices.len()).unwrap_or(0)
    }
}

impl GeometrySink for CpuSink {
    fn create_container(&mut self, fixed_capacity: bool) -> Result<ContainerHandle, SinkError> {
        let id = self.next_container;
        self.next_container += 1;
        self.containers.insert(
            id,
            CpuContainer {
                fixed_capacity,
                ..CpuContainer::default()
            },
        );
        Ok(ContainerHandle(id))
    }

    fn add_vertex(
        &mut self,
        container: ContainerHandle,
        position: Vec3,
    ) -> Result<VertexHandle, SinkError> {
        let cc = self.get_mut(container)?;
        let id = cc.next_vertex;
        cc.next_vertex += 1;
        cc.vertices.insert(id, position);
        Ok(VertexHandle(id))
    }

    fn add_face(
        &mut self,
        container: ContainerHandle,
        a: VertexHandle,
        b: VertexHandle,
        c: VertexHandle,
    ) -> Result<FaceHandle, SinkError> {
        let call = self.add_face_calls;
        self.add_face_calls += 1;
        if self.fail_add_face_on == Some(call) {
            self.fail_add_face_on = None;
            return Err(SinkError::Backend("injected add_face failure".into()));
        }
        if self.fail_add_faces > 0 {
            self.fail_add_faces -= 1;
            return Err(SinkError::Backend("injected add_face failure".into()));
        }
        let cc = self.get_mut(container)?;
        for v in [a, b, c] {
            if !cc.vertices.contains_key(&v.0) {
                return Err(SinkError::UnknownVertex(v));
            }
        }
        let id = cc.next_face;
        cc.next_face += 1;
        cc.faces.insert(id, [a.0, b.0, c.0]);
        Ok(FaceHandle(id))
    }

    fn remove_face(&mut self, container: ContainerHandle, face: FaceHandle) -> bool {
        match self.containers.get_mut(&container.0) {
            Some(cc) => {
                cc.face_colors.remove(&face.0);
                cc.faces.remove(&face.0).is_some()
            }
            None => false,
        }
    }

    fn add_color(
        &mut self,
        container: ContainerHandle,
        rgb: [f32; 3],
        opacity: f32,
    ) -> Result<ColorId, SinkError> {
        let cc = self.get_mut(container)?;
        cc.colors.push((rgb, opacity));
        Ok(ColorId(cc.colors.len() as u32 - 1))
    }

    fn set_face_color(&mut self, container: ContainerHandle, face: FaceHandle, color: ColorId) {
        if let Some(cc) = self.containers.get_mut(&container.0) {
            if cc.faces.contains_key(&face.0) && (color.0 as usize) < cc.colors.len() {
                cc.face_colors.insert(face.0, color.0);
            }
        }
    }

    fn snapshot(&mut self, container: ContainerHandle) -> Result<RenderBlob, SinkError> {
        if self.fail_snapshots.contains(&container) {
            return Err(SinkError::Backend("injected snapshot failure".into()));
        }
        self.snapshots_taken += 1;
        let cc = self.get(container)?;

        let mut face_ids: Vec<u32> = cc.faces.keys().copied().collect();
        face_ids.sort_unstable();

        let mut blob = RenderBlob::default();
        let mut bounds: Option<Aabb> = None;
        for fid in face_ids {
            let corners = cc.faces[&fid];
            // A face whose vertices were reclaimed out from under it is
            // dropped from the snapshot rather than failing the rebuild.
            let Some(resolved) = corners
                .iter()
                .map(|v| cc.vertices.get(v).copied())
                .collect::<Option<Vec<Vec3>>>()
            else {
                continue;
            };
            let rgba = match cc.face_colors.get(&fid) {
                Some(&cid) => {
                    let (rgb, opacity) = cc.colors[cid as usize];
                    [
                        (rgb[0].clamp(0.0, 1.0) * 255.0).round() as u8,
                        (rgb[1].clamp(0.0, 1.0) * 255.0).round() as u8,
                        (rgb[2].clamp(0.0, 1.0) * 255.0).round() as u8,
                        (opacity.clamp(0.0, 1.0) * 255.0).round() as u8,
                    ]
                }
                None => [255, 255, 255, 255],
            };
            let base = (blob.positions.len() / 3) as u32;
            for p in &resolved {
                blob.positions.extend_from_slice(&[p.x, p.y, p.z]);
                blob.colors.extend_from_slice(&rgba);
            }
            blob.indices.extend_from_slice(&[base, base + 1, base + 2]);
            let face_bb = Aabb::from_points(&resolved);
            bounds = match (bounds, face_bb) {
                (Some(a), Some(b)) => Some(a.union(b)),
                (a, b) => a.or(b),
            };
        }
        blob.bounds = bounds;
        Ok(blob)
    }

    fn refresh(&mut self, container: ContainerHandle) {
        if self.containers.contains_key(&container.0) {
            self.refreshes += 1;
        }
    }

    fn reclaim_unused(&mut self, container: ContainerHandle) {
        self.reclaims += 1;
        if let Some(cc) = self.containers.get_mut(&container.0) {
            let live: HashSet<u32> = cc.faces.values().flatten().copied().collect();
            cc.vertices.retain(|id, _| live.contains(id));
        }
    }

    fn attach(&mut self, container: ContainerHandle) {
        if let Some(cc) = self.containers.get_mut(&container.0) {
            cc.attached = true;
        }
    }

    fn detach(&mut self, container: ContainerHandle) {
        if let Some(cc) = self.containers.get_mut(&container.0) {
            cc.attached = false;
        }
    }

    fn destroy(&mut self, container: ContainerHandle) {
        if self.containers.remove(&container.0).is_none() {
            log::debug!("destroy on unknown container {container:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(sink: &mut CpuSink, c: ContainerHandle) -> FaceHandle {
        let a = sink.add_vertex(c, Vec3::new(0.0, 0.0, 0.0)).unwrap();
        let b = sink.add_vertex(c, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let v = sink.add_vertex(c, Vec3::new(0.0, 1.0, 0.0)).unwrap();
        sink.add_face(c, a, b, v).unwrap()
    }

    #[test]
    fn snapshot_emits_three_vertices_per_face() {
        let mut sink = CpuSink::new();
        let c = sink.create_container(true).unwrap();
        tri(&mut sink, c);
        tri(&mut sink, c);
        let blob = sink.snapshot(c).unwrap();
        assert_eq!(blob.triangle_count(), 2);
        assert_eq!(blob.positions.len(), 2 * 3 * 3);
        assert_eq!(blob.colors.len(), 2 * 3 * 4);
        assert!(blob.bounds.is_some());
    }

    #[test]
    fn remove_face_is_best_effort() {
        let mut sink = CpuSink::new();
        let c = sink.create_container(true).unwrap();
        let f = tri(&mut sink, c);
        assert!(sink.remove_face(c, f));
        assert!(!sink.remove_face(c, f));
        assert!(!sink.remove_face(c, FaceHandle(999)));
        assert_eq!(sink.snapshot(c).unwrap().triangle_count(), 0);
    }

    #[test]
    fn face_colors_reach_the_snapshot() {
        let mut sink = CpuSink::new();
        let c = sink.create_container(true).unwrap();
        let f = tri(&mut sink, c);
        let red = sink.add_color(c, [1.0, 0.0, 0.0], 1.0).unwrap();
        sink.set_face_color(c, f, red);
        let blob = sink.snapshot(c).unwrap();
        assert_eq!(&blob.colors[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn reclaim_drops_orphaned_vertices() {
        let mut sink = CpuSink::new();
        let c = sink.create_container(true).unwrap();
        let f = tri(&mut sink, c);
        tri(&mut sink, c);
        assert_eq!(sink.vertex_count(c), 6);
        sink.remove_face(c, f);
        sink.reclaim_unused(c);
        assert_eq!(sink.vertex_count(c), 3);
        assert_eq!(sink.snapshot(c).unwrap().triangle_count(), 1);
    }

    #[test]
    fn injected_failures_surface_as_backend_errors() {
        let mut sink = CpuSink::new();
        let c = sink.create_container(true).unwrap();
        let a = sink.add_vertex(c, Vec3::ZERO).unwrap();
        sink.fail_add_faces = 1;
        assert!(matches!(
            sink.add_face(c, a, a, a),
            Err(SinkError::Backend(_))
        ));
        // The next attempt goes through again.
        assert!(sink.add_face(c, a, a, a).is_ok());

        sink.fail_snapshots.insert(c);
        assert!(sink.snapshot(c).is_err());
        sink.fail_snapshots.clear();
        assert!(sink.snapshot(c).is_ok());
    }

    #[test]
    fn attach_detach_destroy_lifecycle() {
        let mut sink = CpuSink::new();
        let c = sink.create_container(false).unwrap();
        assert!(!sink.is_attached(c));
        sink.attach(c);
        assert!(sink.is_attached(c));
        sink.detach(c);
        assert!(!sink.is_attached(c));
        sink.destroy(c);
        assert!(!sink.is_alive(c));
        assert!(matches!(
            sink.add_vertex(c, Vec3::ZERO),
            Err(SinkError::UnknownContainer(_))
        ));
    }
}
