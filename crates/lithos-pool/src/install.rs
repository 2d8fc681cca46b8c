//! Drives the geometry adapter to materialize one chunk inside a container.

use hashbrown::HashMap;
use lithos_geom::{Vec3, triangle_centroid};
use lithos_mesh::{ChunkGeometry, ChunkOptions, position_key};
use lithos_palette::Colorer;
use lithos_sink::{ColorId, ContainerHandle, FaceHandle, GeometrySink, SinkError, VertexHandle};

use crate::container::{ContainerSlot, MemberFootprint};

/// Adds every face of `geometry` to `slot`'s container, coloring as it goes.
///
/// Smooth shading shares one vertex per distinct position; flat shading gives
/// each source triangle its own three. A mirrored back face reuses the front
/// face's vertices with reversed winding. On any adapter failure the faces
/// added so far are released again and the error is returned; orphaned
/// vertices are left for the adapter's own compaction.
pub fn install_geometry<S: GeometrySink>(
    sink: &mut S,
    slot: &mut ContainerSlot,
    geometry: &ChunkGeometry,
    opts: &ChunkOptions,
    colorer: &Colorer,
) -> Result<MemberFootprint, SinkError> {
    let container = slot.handle;
    let mut shared: HashMap<[u32; 3], VertexHandle> = HashMap::new();
    let mut faces: Vec<FaceHandle> = Vec::with_capacity(geometry.triangles.len());
    let mut verts_added: u32 = 0;

    for idxs in &geometry.triangles {
        let pa = geometry.vertices[idxs[0] as usize];
        let pb = geometry.vertices[idxs[1] as usize];
        let pc = geometry.vertices[idxs[2] as usize];

        let step = add_triangle(
            sink,
            slot,
            opts,
            colorer,
            &mut shared,
            &mut verts_added,
            &mut faces,
            pa,
            pb,
            pc,
        );
        if let Err(e) = step {
            release_faces(sink, container, &faces);
            return Err(e);
        }
    }

    Ok(MemberFootprint {
        tris: faces.len() as u32,
        verts: verts_added,
        faces,
        fidelity: opts.fidelity,
    })
}

fn release_faces<S: GeometrySink>(sink: &mut S, container: ContainerHandle, faces: &[FaceHandle]) {
    for f in faces {
        sink.remove_face(container, *f);
    }
}

#[allow(clippy::too_many_arguments)]
fn add_triangle<S: GeometrySink>(
    sink: &mut S,
    slot: &mut ContainerSlot,
    opts: &ChunkOptions,
    colorer: &Colorer,
    shared: &mut HashMap<[u32; 3], VertexHandle>,
    verts_added: &mut u32,
    faces: &mut Vec<FaceHandle>,
    pa: Vec3,
    pb: Vec3,
    pc: Vec3,
) -> Result<(), SinkError> {
    let container = slot.handle;
    let va = corner_vertex(sink, container, opts, shared, verts_added, pa)?;
    let vb = corner_vertex(sink, container, opts, shared, verts_added, pb)?;
    let vc = corner_vertex(sink, container, opts, shared, verts_added, pc)?;
    let color = register_color(sink, slot, colorer, triangle_centroid(pa, pb, pc))?;

    let front = sink.add_face(container, va, vb, vc)?;
    sink.set_face_color(container, front, color);
    faces.push(front);

    if opts.double_sided {
        let back = sink.add_face(container, va, vc, vb)?;
        sink.set_face_color(container, back, color);
        faces.push(back);
    }
    Ok(())
}

fn corner_vertex<S: GeometrySink>(
    sink: &mut S,
    container: ContainerHandle,
    opts: &ChunkOptions,
    shared: &mut HashMap<[u32; 3], VertexHandle>,
    verts_added: &mut u32,
    p: Vec3,
) -> Result<VertexHandle, SinkError> {
    if opts.flat_shaded {
        let h = sink.add_vertex(container, p)?;
        *verts_added += 1;
        return Ok(h);
    }
    if let Some(&h) = shared.get(&position_key(p)) {
        return Ok(h);
    }
    let h = sink.add_vertex(container, p)?;
    shared.insert(position_key(p), h);
    *verts_added += 1;
    Ok(h)
}

fn register_color<S: GeometrySink>(
    sink: &mut S,
    slot: &mut ContainerSlot,
    colorer: &Colorer,
    centroid: Vec3,
) -> Result<ColorId, SinkError> {
    let sample = colorer.sample(centroid);
    let quant = sample.quantize();
    if let Some(&id) = slot.color_table.get(&quant) {
        return Ok(id);
    }
    let id = sink.add_color(slot.handle, sample.rgb, sample.opacity)?;
    slot.color_table.insert(quant, id);
    Ok(id)
}
