//! Top-level facade for the voxel streaming core: routes block edits into
//! the chunk store, drives the streamer, and exposes whole-world region
//! save/load.

use std::collections::BTreeMap;

use bevy_math::Vec3;
use strata_schemas::coordinates::{BlockPos, ChunkCoord};
use strata_schemas::region::{
    ChunkData, ChunkRegionSnapshot, ChunkSnapshot, RegionLayout, StorageChunkKey, SubchunkRegionLayout,
};
use strata_schemas::voxel::block::BlockState;
use strata_schemas::voxel::registry::BlockRegistry;

use crate::config::StreamConfig;
use crate::error::PersistenceResult;
use crate::persistence::loader::AsyncChunkLoader;
use crate::persistence::metadata::{self, ZoneInfo};
use crate::persistence::region_container::ChunkRegionContainer;
use crate::persistence::PersistenceContext;
use crate::prelude::*;
use crate::voxel::chunk_store::ChunkStore;
use crate::voxel::generator::WorldGenerator;
use crate::voxel::mesh_store::MeshStore;
use crate::voxel::mesher::MeshBuilder;
use crate::voxel::streamer::{ChunkDebugState, ChunkStreamer, QueuePressure, StreamingDeps};

/// One streaming voxel world: registry, generator, resident chunks, meshes,
/// the streaming scheduler and (optionally) a persistence loader.
pub struct World {
    registry: Arc<BlockRegistry>,
    generator: Arc<dyn WorldGenerator>,
    layout: Arc<dyn RegionLayout>,
    store: ChunkStore,
    meshes: Arc<MeshStore>,
    streamer: ChunkStreamer,
    loader: Option<AsyncChunkLoader>,
}

impl World {
    /// Constructs a world with no persistence backend; missing chunks come
    /// from the generator alone.
    pub fn new(
        registry: Arc<BlockRegistry>,
        generator: Arc<dyn WorldGenerator>,
        mesher: Arc<dyn MeshBuilder>,
        config: StreamConfig,
    ) -> Self {
        Self {
            registry,
            generator,
            layout: Arc::new(SubchunkRegionLayout),
            store: ChunkStore::new(),
            meshes: Arc::new(MeshStore::new()),
            streamer: ChunkStreamer::new(config, mesher),
            loader: None,
        }
    }

    /// Constructs a world whose missing chunks are first looked up in the
    /// persistence backend addressed by `ctx`, falling back to generation.
    pub fn with_persistence(
        registry: Arc<BlockRegistry>,
        generator: Arc<dyn WorldGenerator>,
        mesher: Arc<dyn MeshBuilder>,
        config: StreamConfig,
        ctx: &PersistenceContext,
    ) -> Self {
        let mut world = Self::new(registry, generator, mesher, config);
        let zone = metadata::resolve_zone_id(ctx);
        let container = Arc::new(ChunkRegionContainer::new(
            Arc::clone(&ctx.storage),
            ctx.root_path.clone(),
            Arc::clone(&world.layout),
            world.streamer.config().enable_lz4,
        ));
        world.loader = Some(AsyncChunkLoader::new(
            container,
            Arc::clone(&world.generator),
            Arc::clone(&world.registry),
            zone,
            world.streamer.config(),
        ));
        world
    }

    /// The block registry shared with workers.
    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    /// The active world generator.
    pub fn generator(&self) -> &Arc<dyn WorldGenerator> {
        &self.generator
    }

    /// Swaps the world generator. The new generator's config version
    /// invalidates resident chunks generated under the old one as the
    /// streamer walks them.
    pub fn set_generator(&mut self, generator: Arc<dyn WorldGenerator>) {
        self.generator = generator;
    }

    /// Read access to the resident chunks.
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// The mesh store for this world's view. Rendering holds the shared
    /// handle and snapshots entries under its read lock.
    pub fn meshes(&self) -> &Arc<MeshStore> {
        &self.meshes
    }

    /// Writes a block at world coordinates, creating the containing chunk if
    /// needed and dirtying boundary neighbors.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, state: BlockState) {
        self.store.set_block(BlockPos::new(x, y, z), state);
    }

    /// Reads the block at world coordinates; air if the chunk is absent.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> BlockState {
        self.store.get_block(BlockPos::new(x, y, z))
    }

    /// Per-frame streaming step around the observer position.
    pub fn update_streaming(&mut self, observer_pos: Vec3) {
        let mut deps = StreamingDeps {
            store: &mut self.store,
            meshes: &self.meshes,
            loader: self.loader.as_mut(),
            generator: &self.generator,
            registry: &self.registry,
        };
        self.streamer.update(observer_pos, &mut deps);
    }

    /// Applies queued worker completions under the configured budgets. Call
    /// once per frame after [`World::update_streaming`].
    pub fn process_completions(&mut self) {
        let mut deps = StreamingDeps {
            store: &mut self.store,
            meshes: &self.meshes,
            loader: self.loader.as_mut(),
            generator: &self.generator,
            registry: &self.registry,
        };
        self.streamer.process_completions(&mut deps);
    }

    /// Groups every chunk with unsaved edits by region, merges the dirty
    /// spans into the regions' existing on-disk contents, drops all-air
    /// spans, and writes each region atomically. Spans belonging to
    /// non-resident chunks are preserved by the pre-merge read; a region can
    /// hold many more chunks than are ever resident at once.
    pub fn save_all(&mut self, ctx: &PersistenceContext) -> PersistenceResult<()> {
        let zone = metadata::resolve_zone_id(ctx);
        let container = ChunkRegionContainer::new(
            Arc::clone(&ctx.storage),
            ctx.root_path.clone(),
            Arc::clone(&self.layout),
            self.streamer.config().enable_lz4,
        );

        let layout = &self.layout;
        let mut regions: HashMap<(i32, i32, i32), (strata_schemas::region::RegionKey, Vec<ChunkCoord>)> =
            HashMap::new();
        self.store.for_each(|coord, chunk| {
            if !chunk.is_persist_dirty() {
                return;
            }
            let key = layout.region_for_chunk(&zone, coord);
            regions
                .entry((key.x, key.y, key.z))
                .or_insert_with(|| (key, Vec::new()))
                .1
                .push(coord);
        });

        let existing: HashSet<(i32, i32, i32)> = container
            .list_regions(&zone)?
            .into_iter()
            .map(|key| (key.x, key.y, key.z))
            .collect();

        for (region_pos, (region_key, dirty_chunks)) in regions {
            let mut snapshot = if existing.contains(&region_pos) {
                container.load_region(&region_key)?
            } else {
                ChunkRegionSnapshot::empty(region_key.clone())
            };

            let mut merged: BTreeMap<StorageChunkKey, ChunkSnapshot> =
                snapshot.chunks.drain(..).map(|chunk| (chunk.key, chunk)).collect();
            for &coord in &dirty_chunks {
                let Some(chunk) = self.store.get(coord) else {
                    continue;
                };
                for storage_key in self.layout.storage_keys_for_chunk(coord) {
                    merged.remove(&storage_key);
                    let span = self.layout.span_for_storage_key(storage_key);
                    let data = ChunkData::from_chunk(chunk, span);
                    if data.is_all_air() {
                        continue;
                    }
                    merged.insert(
                        storage_key,
                        ChunkSnapshot {
                            key: storage_key,
                            data,
                        },
                    );
                }
            }

            let out = ChunkRegionSnapshot {
                key: region_key,
                chunks: merged.into_values().collect(),
            };
            container.save_region(&out)?;

            for coord in dirty_chunks {
                if let Some(chunk) = self.store.get_mut(coord) {
                    chunk.clear_persist_dirty();
                }
            }
        }

        let mut info = metadata::load_world_info(ctx).unwrap_or_default();
        info.default_zone_id = zone.clone();
        if info.world_display_name.is_empty() {
            info.world_display_name = ctx
                .root_path
                .rsplit('/')
                .next()
                .unwrap_or(&ctx.root_path)
                .to_string();
        }
        metadata::save_world_info(ctx, &info)?;
        let zone_info = metadata::load_zone_info(ctx, &zone).unwrap_or(ZoneInfo {
            zone_id: zone.clone(),
            ..ZoneInfo::default()
        });
        metadata::save_zone_info(ctx, &zone_info)?;
        Ok(())
    }

    /// Clears the world, then loads every persisted region of the context's
    /// zone into resident chunks. A malformed region fails the load; the
    /// world keeps whatever was applied before the failure.
    pub fn load_all(&mut self, ctx: &PersistenceContext) -> PersistenceResult<()> {
        self.clear();
        let zone = metadata::resolve_zone_id(ctx);
        let container = ChunkRegionContainer::new(
            Arc::clone(&ctx.storage),
            ctx.root_path.clone(),
            Arc::clone(&self.layout),
            self.streamer.config().enable_lz4,
        );
        let generator_version = self.generator.config().version;

        let mut touched: HashSet<ChunkCoord> = HashSet::new();
        for key in container.list_regions(&zone)? {
            let region = container.load_region(&key)?;
            for snapshot in &region.chunks {
                let coord = snapshot.data.span.chunk;
                let chunk = self.store.get_or_create(coord);
                chunk.set_world_gen_version(generator_version);
                snapshot.data.apply_to(chunk);
                touched.insert(coord);
            }
        }
        for coord in touched {
            if let Some(chunk) = self.store.get_mut(coord) {
                chunk.clear_mesh_dirty();
                chunk.clear_persist_dirty();
            }
        }
        Ok(())
    }

    /// Synchronously loads one chunk's spans from its region file, bypassing
    /// the async loader. Returns false when the region holds nothing for the
    /// chunk, or cannot be read.
    pub fn load_chunk_from_disk(
        &mut self,
        ctx: &PersistenceContext,
        coord: ChunkCoord,
    ) -> PersistenceResult<bool> {
        let zone = metadata::resolve_zone_id(ctx);
        let container = ChunkRegionContainer::new(
            Arc::clone(&ctx.storage),
            ctx.root_path.clone(),
            Arc::clone(&self.layout),
            self.streamer.config().enable_lz4,
        );
        let key = self.layout.region_for_chunk(&zone, coord);
        let Ok(region) = container.load_region(&key) else {
            return Ok(false);
        };
        let generator_version = self.generator.config().version;

        let mut loaded = false;
        for snapshot in region.chunks.iter().filter(|s| s.data.span.chunk == coord) {
            let chunk = self.store.get_or_create(coord);
            chunk.set_world_gen_version(generator_version);
            snapshot.data.apply_to(chunk);
            loaded = true;
        }
        if loaded {
            if let Some(chunk) = self.store.get_mut(coord) {
                chunk.clear_mesh_dirty();
                chunk.clear_persist_dirty();
            }
        }
        Ok(loaded)
    }

    /// Unloads all chunks, meshes and scheduler state.
    pub fn clear(&mut self) {
        self.streamer.reset(self.loader.as_mut());
        self.store.clear();
        self.meshes.clear();
    }

    /// Drops every stored mesh. Call before tearing down the render context.
    pub fn release_render_resources(&self) {
        self.meshes.clear();
    }

    /// Scheduler states per coordinate, for debug overlays.
    pub fn chunk_state_list(&self) -> Vec<(ChunkCoord, ChunkDebugState)> {
        self.streamer.chunk_state_list(&self.store)
    }

    /// Queue occupancy snapshot for higher-level throttling.
    pub fn queue_pressure(&self) -> QueuePressure {
        self.streamer.queue_pressure()
    }
}
