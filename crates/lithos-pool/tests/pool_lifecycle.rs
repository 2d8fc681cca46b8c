use lithos_geom::Vec3;
use lithos_mesh::{ChunkGeometry, ChunkKey, ChunkOptions, Fidelity};
use lithos_palette::PaletteColor;
use lithos_pool::{ChunkLocation, ChunkPool, Placement, PoolConfig};
use lithos_sink::ContainerHandle;
use lithos_sink::cpu::CpuSink;

/// `n` triangles with all-distinct corner positions, so the footprint is
/// exactly n triangles and 3n vertices under smooth shading.
fn geometry(n: u32) -> ChunkGeometry {
    let mut vertices = Vec::with_capacity(n as usize * 3);
    let mut triangles = Vec::with_capacity(n as usize);
    for i in 0..n {
        let base = vertices.len() as u32;
        let x = i as f32 * 2.0;
        vertices.push(Vec3::new(x, 0.0, 0.0));
        vertices.push(Vec3::new(x + 1.0, 0.0, 0.0));
        vertices.push(Vec3::new(x, 1.0, 0.0));
        triangles.push([base, base + 1, base + 2]);
    }
    ChunkGeometry::new(vertices, triangles)
}

fn solid_opts() -> ChunkOptions {
    ChunkOptions {
        coloring: lithos_mesh::Coloring::Solid(PaletteColor::opaque(0.5, 0.5, 0.5)),
        ..ChunkOptions::default()
    }
}

fn two_container_pool() -> (ChunkPool, CpuSink) {
    let cfg = PoolConfig {
        container_count: 2,
        tri_cap: 100,
        vert_cap: 300,
        reserved_prefix: 0,
        apply_per_tick: 8,
        ..PoolConfig::default()
    };
    (ChunkPool::new(cfg), CpuSink::new())
}

#[test]
fn first_fit_spill_and_backfill() {
    let (mut pool, mut sink) = two_container_pool();
    let a = ChunkKey::new(0, 0, 0);
    let b = ChunkKey::new(1, 0, 0);
    let c = ChunkKey::new(2, 0, 0);

    // A fits in container 1; B (70 tris) spills to container 2.
    assert_eq!(
        pool.add_or_replace_chunk(&mut sink, a, &geometry(40), &solid_opts())
            .unwrap(),
        Placement::Pooled(0)
    );
    assert_eq!(
        pool.add_or_replace_chunk(&mut sink, b, &geometry(70), &solid_opts())
            .unwrap(),
        Placement::Pooled(1)
    );

    assert!(pool.unload_chunk(&mut sink, a));
    let stats = pool.stats();
    assert_eq!(stats.containers[0].tris, 0);
    assert_eq!(stats.containers[0].verts, 0);

    // The freed container takes the next large chunk.
    assert_eq!(
        pool.add_or_replace_chunk(&mut sink, c, &geometry(90), &solid_opts())
            .unwrap(),
        Placement::Pooled(0)
    );
    assert!(pool.counters_consistent());
}

#[test]
fn unload_of_absent_key_is_a_noop() {
    let (mut pool, mut sink) = two_container_pool();
    let a = ChunkKey::new(0, 0, 0);
    pool.add_or_replace_chunk(&mut sink, a, &geometry(10), &solid_opts())
        .unwrap();
    let before = pool.stats();

    assert!(!pool.unload_chunk(&mut sink, ChunkKey::new(9, 9, 9)));

    let after = pool.stats();
    assert_eq!(before.chunks, after.chunks);
    assert_eq!(before.containers[0].tris, after.containers[0].tris);
    assert_eq!(before.containers[1].tris, after.containers[1].tris);
    // A repeated unload of a present key reports only the first removal.
    assert!(pool.unload_chunk(&mut sink, a));
    assert!(!pool.unload_chunk(&mut sink, a));
}

#[test]
fn invalid_geometry_is_rejected_without_side_effects() {
    let (mut pool, mut sink) = two_container_pool();
    let bad = ChunkGeometry::new(vec![], vec![[0, 0, 0]]);
    let err = pool
        .add_or_replace_chunk(&mut sink, ChunkKey::new(0, 0, 0), &bad, &solid_opts())
        .unwrap_err();
    assert!(matches!(err, lithos_pool::PoolError::InvalidInput(_)));
    // Rejected before the pool even built its containers.
    assert_eq!(sink.container_count(), 0);
    assert_eq!(pool.chunk_count(), 0);
}

#[test]
fn oversized_chunk_is_capacity_exhausted() {
    let (mut pool, mut sink) = two_container_pool();
    let err = pool
        .add_or_replace_chunk(
            &mut sink,
            ChunkKey::new(0, 0, 0),
            &geometry(101),
            &solid_opts(),
        )
        .unwrap_err();
    assert!(err.is_capacity());
    assert_eq!(pool.chunk_count(), 0);
}

#[test]
fn fitting_replacement_stays_in_place() {
    let (mut pool, mut sink) = two_container_pool();
    let a = ChunkKey::new(0, 0, 0);
    pool.add_or_replace_chunk(&mut sink, a, &geometry(80), &solid_opts())
        .unwrap();
    // 90 > 100-80 free, but fits once the old 80 are discounted.
    let placed = pool
        .add_or_replace_chunk(&mut sink, a, &geometry(90), &solid_opts())
        .unwrap();
    assert_eq!(placed, Placement::Pooled(0));
    let stats = pool.stats();
    assert_eq!(stats.containers[0].tris, 90);
    assert_eq!(stats.containers[0].members, 1);
    assert!(pool.counters_consistent());
}

#[test]
fn growing_replacement_relocates_and_releases_the_old_footprint() {
    let (mut pool, mut sink) = two_container_pool();
    let a = ChunkKey::new(0, 0, 0);
    let b = ChunkKey::new(1, 0, 0);
    pool.add_or_replace_chunk(&mut sink, a, &geometry(30), &solid_opts())
        .unwrap();
    pool.add_or_replace_chunk(&mut sink, b, &geometry(60), &solid_opts())
        .unwrap();
    // Container 1 now holds 90; replacing A with 50 cannot stay (50+60>100).
    let placed = pool
        .add_or_replace_chunk(&mut sink, a, &geometry(50), &solid_opts())
        .unwrap();
    assert_eq!(placed, Placement::Pooled(1));
    assert_eq!(pool.locate(a), Some(ChunkLocation::Pooled(1)));
    let stats = pool.stats();
    assert_eq!(stats.containers[0].tris, 60);
    assert_eq!(stats.containers[0].members, 1);
    assert_eq!(stats.containers[1].tris, 50);
    assert!(pool.counters_consistent());
}

#[test]
fn failed_relocation_keeps_the_previous_placement() {
    let (mut pool, mut sink) = two_container_pool();
    let a = ChunkKey::new(0, 0, 0);
    let b = ChunkKey::new(1, 0, 0);
    let c = ChunkKey::new(2, 0, 0);
    pool.add_or_replace_chunk(&mut sink, a, &geometry(30), &solid_opts())
        .unwrap();
    pool.add_or_replace_chunk(&mut sink, b, &geometry(60), &solid_opts())
        .unwrap();
    pool.add_or_replace_chunk(&mut sink, c, &geometry(90), &solid_opts())
        .unwrap();
    // Growing A to 50 fits nowhere: its own container still holds B's 60,
    // and the other one holds C's 90.
    let err = pool
        .add_or_replace_chunk(&mut sink, a, &geometry(50), &solid_opts())
        .unwrap_err();
    assert!(err.is_capacity());
    assert_eq!(pool.locate(a), Some(ChunkLocation::Pooled(0)));
    let stats = pool.stats();
    assert_eq!(stats.containers[0].tris, 90);
    assert_eq!(stats.containers[0].members, 2);
    assert!(pool.counters_consistent());
}

#[test]
fn effective_fidelity_tracks_the_member_maximum() {
    let (mut pool, mut sink) = two_container_pool();
    let a = ChunkKey::new(0, 0, 0);
    let b = ChunkKey::new(1, 0, 0);
    let with_fidelity = |f| ChunkOptions {
        fidelity: Some(f),
        ..solid_opts()
    };
    pool.add_or_replace_chunk(&mut sink, a, &geometry(10), &with_fidelity(Fidelity::Box))
        .unwrap();
    pool.add_or_replace_chunk(&mut sink, b, &geometry(10), &with_fidelity(Fidelity::Surface))
        .unwrap();
    assert_eq!(pool.stats().containers[0].fidelity, Some(Fidelity::Surface));

    pool.unload_chunk(&mut sink, b);
    assert_eq!(pool.stats().containers[0].fidelity, Some(Fidelity::Box));

    pool.unload_chunk(&mut sink, a);
    assert_eq!(pool.stats().containers[0].fidelity, None);
}

#[test]
fn adapter_failure_heals_counters_and_retries_in_place() {
    let (mut pool, mut sink) = two_container_pool();
    sink.fail_add_faces = 1;
    let placed = pool
        .add_or_replace_chunk(&mut sink, ChunkKey::new(0, 0, 0), &geometry(5), &solid_opts())
        .unwrap();
    // The retry after the self-heal recount lands in the same container.
    assert_eq!(placed, Placement::Pooled(0));
    assert!(pool.counters_consistent());
    assert_eq!(pool.stats().containers[0].tris, 5);
}

#[test]
fn adapter_failure_escalates_to_an_alternate_container() {
    let (mut pool, mut sink) = two_container_pool();
    // Both the first attempt and the healed retry fail; the rescue scan must
    // land the chunk in the other container.
    sink.fail_add_faces = 2;
    let placed = pool
        .add_or_replace_chunk(&mut sink, ChunkKey::new(0, 0, 0), &geometry(5), &solid_opts())
        .unwrap();
    assert_eq!(placed, Placement::Pooled(1));
    assert!(pool.counters_consistent());
    let stats = pool.stats();
    assert_eq!(stats.containers[0].tris, 0);
    assert_eq!(stats.containers[1].tris, 5);
}

#[test]
fn isolated_chunk_reuses_matching_container() {
    let (mut pool, mut sink) = two_container_pool();
    let d = ChunkKey::new(4, 0, 4);
    let opts = ChunkOptions {
        isolated: true,
        fidelity: Some(Fidelity::Hull),
        ..solid_opts()
    };
    let first = pool
        .add_or_replace_chunk(&mut sink, d, &geometry(8), &opts)
        .unwrap();
    assert_eq!(first, Placement::Isolated { reused: false });
    // Pool containers 0/1 plus one isolated container.
    assert_eq!(sink.container_count(), 3);
    let isolated_handle = ContainerHandle(2);
    assert!(sink.is_alive(isolated_handle));

    // Same fidelity class: the container is kept as-is.
    let again = pool
        .add_or_replace_chunk(&mut sink, d, &geometry(8), &opts)
        .unwrap();
    assert_eq!(again, Placement::Isolated { reused: true });
    assert!(sink.is_alive(isolated_handle));
    assert_eq!(sink.container_count(), 3);

    // Different fidelity class: destroyed and recreated.
    let precise = ChunkOptions {
        fidelity: Some(Fidelity::Precise),
        ..opts
    };
    let rebuilt = pool
        .add_or_replace_chunk(&mut sink, d, &geometry(8), &precise)
        .unwrap();
    assert_eq!(rebuilt, Placement::Isolated { reused: false });
    assert!(!sink.is_alive(isolated_handle));
    assert_eq!(sink.container_count(), 3);
}

#[test]
fn unloaded_isolated_chunk_detaches_and_reattaches() {
    let (mut pool, mut sink) = two_container_pool();
    let d = ChunkKey::new(4, 0, 4);
    let opts = ChunkOptions {
        isolated: true,
        fidelity: Some(Fidelity::Hull),
        ..solid_opts()
    };
    pool.add_or_replace_chunk(&mut sink, d, &geometry(8), &opts)
        .unwrap();
    let handle = ContainerHandle(2);
    assert!(sink.is_attached(handle));

    assert!(pool.unload_chunk(&mut sink, d));
    assert!(!pool.contains(d));
    assert!(sink.is_alive(handle));
    assert!(!sink.is_attached(handle));
    assert_eq!(pool.stats().isolated_detached, 1);

    // A matching re-add brings the same container back without a rebuild.
    let again = pool
        .add_or_replace_chunk(&mut sink, d, &geometry(8), &opts)
        .unwrap();
    assert_eq!(again, Placement::Isolated { reused: true });
    assert!(sink.is_attached(handle));
    assert_eq!(pool.stats().isolated_detached, 0);
}

#[test]
fn evict_detached_destroys_cached_isolated_containers() {
    let (mut pool, mut sink) = two_container_pool();
    let d = ChunkKey::new(4, 0, 4);
    let opts = ChunkOptions {
        isolated: true,
        fidelity: Some(Fidelity::Hull),
        ..solid_opts()
    };
    pool.add_or_replace_chunk(&mut sink, d, &geometry(8), &opts)
        .unwrap();
    pool.unload_chunk(&mut sink, d);
    assert_eq!(pool.evict_detached(&mut sink), 1);
    assert!(!sink.is_alive(ContainerHandle(2)));
    assert_eq!(pool.stats().isolated_total, 0);
    // Nothing left to evict.
    assert_eq!(pool.evict_detached(&mut sink), 0);
}

#[test]
fn mode_switch_tears_down_and_rebuilds() {
    let (mut pool, mut sink) = two_container_pool();
    let key = ChunkKey::new(3, 0, 3);
    pool.add_or_replace_chunk(&mut sink, key, &geometry(20), &solid_opts())
        .unwrap();
    assert_eq!(pool.locate(key), Some(ChunkLocation::Pooled(0)));

    // Pooled -> isolated: the pooled footprint is fully released.
    let opts = ChunkOptions {
        isolated: true,
        ..solid_opts()
    };
    pool.add_or_replace_chunk(&mut sink, key, &geometry(20), &opts)
        .unwrap();
    assert_eq!(pool.locate(key), Some(ChunkLocation::Isolated));
    assert_eq!(pool.stats().containers[0].tris, 0);

    // Isolated -> pooled: the isolated container is destroyed, cache included.
    pool.add_or_replace_chunk(&mut sink, key, &geometry(20), &solid_opts())
        .unwrap();
    assert_eq!(pool.locate(key), Some(ChunkLocation::Pooled(0)));
    assert_eq!(pool.stats().isolated_total, 0);
    assert!(pool.counters_consistent());
}

#[test]
fn scarce_placements_cycle_through_the_reserved_prefix() {
    let cfg = PoolConfig {
        container_count: 5,
        tri_cap: 100,
        vert_cap: 300,
        reserved_prefix: 3,
        scarce_per_container: 1,
        ..PoolConfig::default()
    };
    let mut pool = ChunkPool::new(cfg);
    let mut sink = CpuSink::new();
    let opts = ChunkOptions {
        fidelity: Some(Fidelity::Precise),
        ..solid_opts()
    };

    let mut hit = Vec::new();
    for i in 0..3 {
        let placed = pool
            .add_or_replace_chunk(&mut sink, ChunkKey::new(i, 0, 0), &geometry(5), &opts)
            .unwrap();
        let Placement::Pooled(id) = placed else {
            panic!("scarce chunks are pooled");
        };
        assert!(id < 3, "scarce placement must stay in the prefix");
        hit.push(id);
    }
    hit.sort_unstable();
    assert_eq!(hit, vec![0, 1, 2]);

    // Prefix saturated at one scarce member each: the fourth is refused even
    // though containers outside the prefix have room.
    let err = pool
        .add_or_replace_chunk(&mut sink, ChunkKey::new(9, 0, 0), &geometry(5), &opts)
        .unwrap_err();
    assert!(err.is_capacity());
    for c in &pool.stats().containers[..3] {
        assert!(c.scarce_members <= 1);
    }
}

#[test]
fn ordinary_chunks_may_still_use_prefix_containers() {
    let cfg = PoolConfig {
        container_count: 2,
        tri_cap: 100,
        vert_cap: 300,
        reserved_prefix: 2,
        scarce_per_container: 1,
        ..PoolConfig::default()
    };
    let mut pool = ChunkPool::new(cfg);
    let mut sink = CpuSink::new();
    let placed = pool
        .add_or_replace_chunk(&mut sink, ChunkKey::new(0, 0, 0), &geometry(10), &solid_opts())
        .unwrap();
    assert_eq!(placed, Placement::Pooled(0));
}
