//! Save/load round trips over the in-memory storage backend, and streaming
//! worlds backed by the asynchronous region loader.

use std::sync::Arc;

use bevy_math::Vec3;
use strata_schemas::coordinates::ChunkCoord;
use strata_schemas::voxel::block::{BlockId, BlockState};
use strata_schemas::voxel::registry::{BlockRegistry, BlockType};
use strata_world::config::StreamConfig;
use strata_world::persistence::metadata;
use strata_world::persistence::PersistenceContext;
use strata_world::storage::{FilesystemBackend, MemoryBackend, StorageBackend};
use strata_world::voxel::generator::{FlatWorldGenerator, WorldGenConfig};
use strata_world::voxel::mesher::CulledMesher;
use strata_world::voxel::world::World;

fn stone() -> BlockState {
    BlockState::new(BlockId(1))
}

fn registry() -> Arc<BlockRegistry> {
    let mut registry = BlockRegistry::new();
    registry.register(BlockType::solid("stone")).unwrap();
    Arc::new(registry)
}

fn generator(ground_height: i32) -> Arc<FlatWorldGenerator> {
    Arc::new(FlatWorldGenerator::new(
        WorldGenConfig::default(),
        ground_height,
        stone(),
    ))
}

fn test_config() -> StreamConfig {
    StreamConfig {
        view_distance_chunks: 2,
        unload_distance_chunks: 3,
        worker_threads: 0,
        io_threads: 0,
        load_worker_threads: 0,
        prefetch_radius: 0,
        ..StreamConfig::default()
    }
}

fn run_frames(world: &mut World, observer: Vec3, frames: usize) {
    for _ in 0..frames {
        world.update_streaming(observer);
        world.process_completions();
    }
}

fn memory_context() -> (PersistenceContext, MemoryBackend) {
    let backend = MemoryBackend::new();
    (
        PersistenceContext::new(Arc::new(backend.clone()), "saves/world_1"),
        backend,
    )
}

#[test]
fn save_load_round_trip_preserves_edits() -> anyhow::Result<()> {
    let (ctx, backend) = memory_context();
    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    run_frames(&mut world, Vec3::ZERO, 30);

    world.set_block(0, 0, 0, stone());
    world.set_block(5, -3, 7, BlockState::AIR);
    world.save_all(&ctx)?;

    assert!(backend.exists("saves/world_1/worldInfo.json")?);
    assert!(backend.exists("saves/world_1/zones/strata/default/zoneInfo.json")?);
    assert!(!world.store().get(ChunkCoord::ZERO).unwrap().is_persist_dirty());

    world.clear();
    assert_eq!(world.get_block(0, 0, 0), BlockState::AIR);
    world.load_all(&ctx)?;

    assert_eq!(world.get_block(0, 0, 0), stone());
    assert!(world.get_block(5, -3, 7).is_air());
    // The rest of the edited chunk kept its persisted content.
    assert_eq!(world.get_block(5, -4, 7), stone());

    // Chunks that were never edited regenerate; resumed streaming matches
    // the generator everywhere else.
    run_frames(&mut world, Vec3::ZERO, 30);
    assert_eq!(world.get_block(40, -1, 0), stone());
    assert!(world.get_block(40, 1, 0).is_air());
    Ok(())
}

#[test]
fn save_is_idempotent_after_load() {
    let (ctx, backend) = memory_context();
    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    run_frames(&mut world, Vec3::ZERO, 30);
    world.set_block(1, 1, 1, stone());
    world.save_all(&ctx).unwrap();

    let region_path = "saves/world_1/zones/strata/default/regions/region_0_0_0.bin";
    let first = backend.read_all(region_path).unwrap();

    world.load_all(&ctx).unwrap();
    world.save_all(&ctx).unwrap();
    let second = backend.read_all(region_path).unwrap();
    assert_eq!(first, second, "save ∘ load ∘ save must equal save");
}

#[test]
fn merge_preserves_spans_of_non_resident_chunks() -> anyhow::Result<()> {
    let (ctx, _) = memory_context();

    // First session edits chunk (0,0,0).
    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    run_frames(&mut world, Vec3::ZERO, 30);
    world.set_block(0, 0, 0, stone());
    world.save_all(&ctx)?;

    // Second session never has chunk (0,0,0) resident and edits a different
    // chunk of the same region.
    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    world.set_block(64, 10, 0, stone());
    world.save_all(&ctx)?;

    // Both edits survive in the merged region.
    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    world.load_all(&ctx)?;
    assert_eq!(world.get_block(0, 0, 0), stone());
    assert_eq!(world.get_block(64, 10, 0), stone());
    Ok(())
}

#[test]
fn streaming_world_loads_persisted_chunks_from_disk() {
    let (ctx, _) = memory_context();

    // Persist an edited world.
    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    run_frames(&mut world, Vec3::ZERO, 30);
    world.set_block(0, 0, 0, stone());
    world.set_block(0, 0, 33, stone());
    world.save_all(&ctx).unwrap();
    drop(world);

    // A fresh world streams the same area: the edited chunks must come from
    // disk, not the generator.
    let mut world =
        World::with_persistence(registry(), generator(0), Arc::new(CulledMesher), test_config(), &ctx);
    run_frames(&mut world, Vec3::ZERO, 30);

    assert_eq!(world.get_block(0, 0, 0), stone());
    assert_eq!(world.get_block(0, 0, 33), stone());
    for coord in [ChunkCoord::new(0, 0, 0), ChunkCoord::new(0, 0, 1)] {
        let chunk = world.store().get(coord).unwrap();
        assert!(chunk.loaded_from_disk(), "chunk {coord} should come from disk");
        assert!(!chunk.is_persist_dirty());
    }

    // Pure-generator chunks still fill the rest of the desired set.
    assert_eq!(world.get_block(40, -1, 0), stone());
    let pressure = world.queue_pressure();
    assert!(!pressure.overloaded, "{pressure:?}");
}

#[test]
fn zone_override_isolates_worlds() {
    let (ctx, _) = memory_context();
    let ctx_a = ctx.clone().with_zone("strata:overworld");
    let ctx_b = ctx.with_zone("strata:basement");

    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    run_frames(&mut world, Vec3::ZERO, 30);
    world.set_block(0, 0, 0, stone());
    world.save_all(&ctx_a).unwrap();

    let mut other = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    other.load_all(&ctx_b).unwrap();
    assert!(other.store().is_empty());
    other.load_all(&ctx_a).unwrap();
    assert_eq!(other.get_block(0, 0, 0), stone());
}

#[test]
fn world_metadata_written_on_save() {
    let (ctx, _) = memory_context();
    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    world.set_block(0, 0, 0, stone());
    world.save_all(&ctx).unwrap();

    let info = metadata::load_world_info(&ctx).unwrap();
    assert_eq!(info.default_zone_id, "strata:default");
    assert_eq!(info.world_display_name, "world_1");
    let zone = metadata::load_zone_info(&ctx, "strata:default").unwrap();
    assert_eq!(zone.zone_id, "strata:default");
}

#[test]
fn filesystem_backend_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("world").to_string_lossy().into_owned();
    let ctx = PersistenceContext::new(Arc::new(FilesystemBackend), root.clone());

    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    world.set_block(0, 0, 0, stone());
    world.set_block(100, -5, -100, stone());
    world.save_all(&ctx)?;
    assert!(dir.path().join("world/worldInfo.json").exists());

    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    world.load_all(&ctx)?;
    assert_eq!(world.get_block(0, 0, 0), stone());
    assert_eq!(world.get_block(100, -5, -100), stone());
    Ok(())
}

#[test]
fn synchronous_single_chunk_load() {
    let (ctx, _) = memory_context();
    let mut world = World::new(registry(), generator(0), Arc::new(CulledMesher), test_config());
    world.set_block(0, 0, 0, stone());
    world.save_all(&ctx).unwrap();
    world.clear();

    assert!(world.load_chunk_from_disk(&ctx, ChunkCoord::ZERO).unwrap());
    assert_eq!(world.get_block(0, 0, 0), stone());
    assert!(!world
        .load_chunk_from_disk(&ctx, ChunkCoord::new(9, 9, 9))
        .unwrap());
}
