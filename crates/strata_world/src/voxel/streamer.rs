//! The streaming scheduler: decides which chunks should exist, drives the
//! generation and meshing pools, applies their completions under per-frame
//! budgets and evicts chunks the observer has left behind.
//!
//! Per-coordinate lifecycle:
//!
//! ```text
//! Missing -> QueuedGen -> ReadyData -> QueuedMesh -> ReadyMesh
//!         \-> (loader payload applies; the chunk appears as ReadyData
//!              with the loaded-from-disk marker set)
//! ```
//!
//! All state transitions happen on the main thread. Workers only compute;
//! the mesh revision snapshot captured at enqueue time is the ordering token
//! that lets late mesh results be discarded without cross-thread locking.

use bevy_math::Vec3;
use crossbeam_channel::{Receiver, Sender};
use lru::LruCache;
use strata_schemas::coordinates::{BlockPos, ChunkCoord, CHUNK_DIM, PADDED_DIMZ};
use strata_schemas::voxel::block::{BlockState, ALL_DIRECTIONS};
use strata_schemas::voxel::chunk::{empty_chunk_blocks, ChunkBlocks};
use strata_schemas::voxel::registry::BlockRegistry;
use tracing::warn;

use crate::config::{effective_limit, StreamConfig};
use crate::persistence::loader::AsyncChunkLoader;
use crate::prelude::*;
use crate::tasks::WorkerPool;
use crate::voxel::chunk_store::ChunkStore;
use crate::voxel::generator::WorldGenerator;
use crate::voxel::mesh_store::MeshStore;
use crate::voxel::mesher::{empty_padded_blocks, ChunkMesh, MeshBuilder};

/// Scheduler state of one chunk coordinate. Coordinates with no entry are
/// `Missing`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ChunkState {
    /// A generation job is queued or running.
    QueuedGen,
    /// Block data is resident; no up-to-date mesh yet.
    ReadyData,
    /// A mesh job is queued or running.
    QueuedMesh,
    /// Block data and mesh are both current.
    ReadyMesh,
}

/// Debug-view state, refining [`ChunkState::ReadyData`] with the
/// loaded-from-disk marker.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ChunkDebugState {
    /// A generation job is queued or running.
    QueuedGen,
    /// Block data is resident; no up-to-date mesh yet.
    ReadyData,
    /// Resident block data originated from persistence.
    LoadedFromDisk,
    /// A mesh job is queued or running.
    QueuedMesh,
    /// Block data and mesh are both current.
    ReadyMesh,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum MeshRequestKind {
    Missing,
    Dirty,
}

struct GenResult {
    coord: ChunkCoord,
    blocks: ChunkBlocks,
    world_gen_version: u32,
    cancelled: bool,
    cancel_token: Arc<AtomicBool>,
}

struct MeshResult {
    coord: ChunkCoord,
    revision: u64,
    mesh: ChunkMesh,
    empty: bool,
}

/// Snapshot of the streamer's queue occupancy, for higher-level throttling.
#[derive(Copy, Clone, Default, Debug)]
pub struct QueuePressure {
    /// Generation jobs queued or running.
    pub in_flight_generation: usize,
    /// Mesh jobs queued or running.
    pub in_flight_meshing: usize,
    /// Loader requests awaiting their payload.
    pub pending_loads: usize,
    /// Coordinates in the `QueuedGen` state.
    pub queued_generation: usize,
    /// Coordinates in the `QueuedMesh` state.
    pub queued_meshing: usize,
    /// Coordinates holding data but no scheduled mesh yet.
    pub ready_for_meshing: usize,
    /// True while any stage is saturated or work remains outstanding.
    pub overloaded: bool,
}

/// The shared collaborators a streaming step operates on. The streamer holds
/// no references between frames; everything is threaded through per call.
pub struct StreamingDeps<'a> {
    /// The resident chunk cache.
    pub store: &'a mut ChunkStore,
    /// Mesh storage for the active view.
    pub meshes: &'a MeshStore,
    /// Optional persistence loader consulted before generating.
    pub loader: Option<&'a mut AsyncChunkLoader>,
    /// The active world generator.
    pub generator: &'a Arc<dyn WorldGenerator>,
    /// The block registry used to sanitize worker results.
    pub registry: &'a Arc<BlockRegistry>,
}

/// Coordinates desired-set computation, worker pools, completion application
/// and eviction for one view of the world.
pub struct ChunkStreamer {
    config: StreamConfig,
    mesher: Arc<dyn MeshBuilder>,

    gen_pool: WorkerPool,
    mesh_pool: WorkerPool,
    gen_tx: Sender<GenResult>,
    gen_rx: Receiver<GenResult>,
    mesh_tx: Sender<MeshResult>,
    mesh_rx: Receiver<MeshResult>,

    states: HashMap<ChunkCoord, ChunkState>,
    gen_cancel: HashMap<ChunkCoord, Arc<AtomicBool>>,
    mesh_in_flight: HashMap<ChunkCoord, MeshRequestKind>,
    desired: Vec<ChunkCoord>,
    desired_set: HashSet<ChunkCoord>,
    in_flight_gen: usize,
    in_flight_mesh: usize,
    in_flight_mesh_missing: usize,
    in_flight_mesh_dirty: usize,
    cache: LruCache<ChunkCoord, ()>,
    load_pending: HashSet<ChunkCoord>,
    last_center: Option<ChunkCoord>,
    last_view_distance: i32,
    last_unload_distance: i32,
    dirty_cursor: usize,
    warned_unknown_blocks: bool,
}

impl ChunkStreamer {
    /// Constructs a streamer with the given configuration and mesh builder.
    pub fn new(config: StreamConfig, mesher: Arc<dyn MeshBuilder>) -> Self {
        let (gen_pool, mesh_pool) = Self::build_pools(&config);
        let (gen_tx, gen_rx) = crossbeam_channel::unbounded();
        let (mesh_tx, mesh_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            mesher,
            gen_pool,
            mesh_pool,
            gen_tx,
            gen_rx,
            mesh_tx,
            mesh_rx,
            states: HashMap::new(),
            gen_cancel: HashMap::new(),
            mesh_in_flight: HashMap::new(),
            desired: Vec::new(),
            desired_set: HashSet::new(),
            in_flight_gen: 0,
            in_flight_mesh: 0,
            in_flight_mesh_missing: 0,
            in_flight_mesh_dirty: 0,
            cache: LruCache::unbounded(),
            load_pending: HashSet::new(),
            last_center: None,
            last_view_distance: -1,
            last_unload_distance: -1,
            dirty_cursor: 0,
            warned_unknown_blocks: false,
        }
    }

    fn build_pools(config: &StreamConfig) -> (WorkerPool, WorkerPool) {
        let mesh_threads = config.worker_threads / 2;
        let gen_threads = config.worker_threads - mesh_threads;
        (
            WorkerPool::new("chunk-gen", gen_threads),
            WorkerPool::new("chunk-mesh", mesh_threads),
        )
    }

    /// The active configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Replaces the configuration, resizing the worker pools and forcing a
    /// desired-set rebuild on the next update.
    pub fn set_config(&mut self, config: StreamConfig) {
        self.config = config;
        let (gen_pool, mesh_pool) = Self::build_pools(&self.config);
        self.gen_pool = gen_pool;
        self.mesh_pool = mesh_pool;
        self.desired.clear();
        self.desired_set.clear();
        self.last_center = None;
        self.last_view_distance = -1;
        self.last_unload_distance = -1;
        self.dirty_cursor = 0;
    }

    fn observer_chunk(observer_pos: Vec3) -> ChunkCoord {
        BlockPos::new(
            observer_pos.x.floor() as i32,
            observer_pos.y.floor() as i32,
            observer_pos.z.floor() as i32,
        )
        .into()
    }

    /// Per-frame scheduling: recompute the desired set when the observer
    /// crossed a chunk boundary, request loads or queue generation for
    /// missing chunks, queue meshing for ready or dirty chunks, and evict
    /// chunks outside the unload radius.
    pub fn update(&mut self, observer_pos: Vec3, deps: &mut StreamingDeps<'_>) {
        let center = Self::observer_chunk(observer_pos);
        let view_distance = self.config.view_distance_chunks.max(0);
        let unload_distance = self.config.unload_distance_chunks.max(view_distance);
        let view_radius_sq = view_distance * view_distance;
        let unload_radius_sq = unload_distance * unload_distance;

        let rebuild_desired = self.last_center != Some(center)
            || self.last_view_distance != view_distance
            || self.last_unload_distance != unload_distance;

        if rebuild_desired {
            self.rebuild_desired(center, view_distance, view_radius_sq, unload_distance);
            if let Some(loader) = deps.loader.as_deref_mut() {
                let desired_set = &self.desired_set;
                let cancelled: Vec<ChunkCoord> = self
                    .load_pending
                    .iter()
                    .copied()
                    .filter(|coord| !desired_set.contains(coord))
                    .collect();
                for coord in cancelled {
                    loader.cancel(coord);
                    self.load_pending.remove(&coord);
                }
            }
        }

        let gen_limit = effective_limit(self.config.gen_queue_limit);
        let (mesh_limit, mesh_limit_missing, mesh_limit_dirty) = self.mesh_limits();

        let mut gen_full = self.in_flight_gen >= gen_limit;
        let mut mesh_full_missing = self.in_flight_mesh_missing >= mesh_limit_missing;

        // Walk the desired list near-to-far, filling in missing chunks.
        if !self.desired.is_empty() {
            let generator_version = deps.generator.config().version;
            let budget = if self.config.update_budget_per_frame == 0 {
                self.desired.len()
            } else {
                self.config.update_budget_per_frame
            };
            let mut queued = 0usize;
            let mut scanned = 0usize;
            while queued < budget && scanned < self.desired.len() {
                let coord = self.desired[scanned];
                scanned += 1;

                if gen_full && mesh_full_missing {
                    break;
                }

                let mut state = self.states.get(&coord).copied();
                let resident = deps.store.get(coord).is_some();
                let mut requested = false;
                if !resident && state != Some(ChunkState::QueuedGen) {
                    if let Some(loader) = deps.loader.as_deref_mut() {
                        requested = loader.request(coord);
                    }
                }

                if resident {
                    self.load_pending.remove(&coord);

                    let stale = deps
                        .store
                        .get(coord)
                        .is_some_and(|c| c.world_gen_version() != generator_version);
                    if stale {
                        deps.meshes.remove(coord);
                        deps.store.remove(coord);
                        self.states.remove(&coord);
                        self.cache.pop(&coord);
                        if !gen_full {
                            self.enqueue_generation(coord, deps.generator);
                            gen_full = self.in_flight_gen >= gen_limit;
                            queued += 1;
                        }
                        continue;
                    }

                    self.cache.put(coord, ());
                    let has_mesh = deps.meshes.contains(coord);
                    let is_meshed = has_mesh || state == Some(ChunkState::ReadyMesh);
                    if state.is_none() || state == Some(ChunkState::QueuedGen) {
                        let refreshed = if is_meshed {
                            ChunkState::ReadyMesh
                        } else {
                            ChunkState::ReadyData
                        };
                        self.states.insert(coord, refreshed);
                        state = Some(refreshed);
                    }

                    let (empty, allow_missing_neighbors) = deps
                        .store
                        .get(coord)
                        .map(|c| (c.is_empty(), c.loaded_from_disk()))
                        .unwrap_or((true, false));
                    if empty {
                        deps.meshes.remove(coord);
                        if let Some(chunk) = deps.store.get_mut(coord) {
                            chunk.clear_mesh_dirty();
                        }
                        self.states.insert(coord, ChunkState::ReadyMesh);
                        continue;
                    }

                    if !is_meshed
                        && state != Some(ChunkState::QueuedMesh)
                        && !mesh_full_missing
                        && (allow_missing_neighbors || self.has_all_neighbors(deps.store, coord))
                    {
                        self.enqueue_mesh(coord, deps.store, deps.registry, MeshRequestKind::Missing);
                        mesh_full_missing = self.in_flight_mesh_missing >= mesh_limit_missing;
                        queued += 1;
                    }
                    continue;
                }

                if state == Some(ChunkState::QueuedGen) {
                    continue;
                }

                if requested {
                    self.load_pending.insert(coord);
                    queued += 1;
                    continue;
                }
                if deps
                    .loader
                    .as_deref()
                    .is_some_and(|loader| loader.is_pending(coord))
                {
                    self.load_pending.insert(coord);
                    queued += 1;
                    continue;
                }
                self.load_pending.remove(&coord);

                if !gen_full {
                    self.enqueue_generation(coord, deps.generator);
                    gen_full = self.in_flight_gen >= gen_limit;
                    queued += 1;
                }
            }
        }

        // Round-robin over the desired list for dirty-but-meshed chunks, in a
        // reserved budget partition so edit storms cannot starve new chunks.
        {
            if self.dirty_cursor >= self.desired.len() {
                self.dirty_cursor = 0;
            }
            let mut scanned = 0usize;
            while !self.desired.is_empty() && scanned < self.desired.len() {
                if self.in_flight_mesh >= mesh_limit || self.in_flight_mesh_dirty >= mesh_limit_dirty {
                    break;
                }
                let coord = self.desired[self.dirty_cursor];
                scanned += 1;
                self.dirty_cursor += 1;
                if self.dirty_cursor >= self.desired.len() {
                    self.dirty_cursor = 0;
                }

                let state = self.states.get(&coord).copied();
                let Some((empty, dirty)) = deps.store.get(coord).map(|c| (c.is_empty(), c.is_mesh_dirty()))
                else {
                    continue;
                };
                if empty {
                    continue;
                }
                let is_meshed = deps.meshes.contains(coord) || state == Some(ChunkState::ReadyMesh);
                if !is_meshed || !dirty || state == Some(ChunkState::QueuedMesh) {
                    continue;
                }
                if !self.has_all_neighbors(deps.store, coord) {
                    continue;
                }
                self.enqueue_mesh(coord, deps.store, deps.registry, MeshRequestKind::Dirty);
            }
        }

        // Evict everything beyond the unload radius once per center change.
        if rebuild_desired {
            let mut to_evict = Vec::new();
            deps.store.for_each(|coord, _| {
                if center.distance_squared(coord) > unload_radius_sq {
                    to_evict.push(coord);
                }
            });
            for coord in to_evict {
                deps.meshes.remove(coord);
                deps.store.remove(coord);
                self.cache.pop(&coord);
                self.states.remove(&coord);
            }
        }

        // Then trim residency to the configured cap, least-recently-touched
        // first, never touching chunks in the desired set.
        let max_resident = self.config.max_resident_chunks;
        if max_resident > 0 && self.cache.len() > max_resident {
            let mut excess = self.cache.len() - max_resident;
            let mut evict = Vec::new();
            for (coord, _) in self.cache.iter().rev() {
                if excess == 0 {
                    break;
                }
                if self.desired_set.contains(coord) {
                    continue;
                }
                evict.push(*coord);
                excess -= 1;
            }
            for coord in evict {
                self.cache.pop(&coord);
                deps.meshes.remove(coord);
                deps.store.remove(coord);
                self.states.remove(&coord);
            }
        }
    }

    fn rebuild_desired(&mut self, center: ChunkCoord, view_distance: i32, view_radius_sq: i32, unload_distance: i32) {
        let mut desired: Vec<(i32, ChunkCoord)> = Vec::with_capacity(
            ((view_distance * 2 + 1) * (view_distance * 2 + 1) * (view_distance * 2 + 1)) as usize,
        );
        for dz in -view_distance..=view_distance {
            for dy in -view_distance..=view_distance {
                for dx in -view_distance..=view_distance {
                    let coord = center.offset(dx, dy, dz);
                    let dist_sq = center.distance_squared(coord);
                    if dist_sq > view_radius_sq {
                        continue;
                    }
                    desired.push((dist_sq, coord));
                }
            }
        }
        desired.sort_by_key(|&(dist_sq, _)| dist_sq);

        self.desired.clear();
        self.desired_set.clear();
        self.desired.reserve(desired.len());
        self.desired_set.reserve(desired.len());
        for (_, coord) in desired {
            self.desired.push(coord);
            self.desired_set.insert(coord);
        }

        self.last_center = Some(center);
        self.last_view_distance = view_distance;
        self.last_unload_distance = unload_distance;
        self.dirty_cursor = 0;

        // Abandon queued work for coordinates that left the desired set.
        let desired_set = &self.desired_set;
        let gen_cancel = &mut self.gen_cancel;
        self.states.retain(|coord, state| {
            let queued = matches!(state, ChunkState::QueuedGen | ChunkState::QueuedMesh);
            if !queued || desired_set.contains(coord) {
                return true;
            }
            if *state == ChunkState::QueuedGen {
                if let Some(flag) = gen_cancel.remove(coord) {
                    flag.store(true, AtomicOrdering::Relaxed);
                }
            }
            false
        });
    }

    fn mesh_limits(&self) -> (usize, usize, usize) {
        let mesh_limit = effective_limit(self.config.mesh_queue_limit);
        if mesh_limit == usize::MAX {
            return (mesh_limit, mesh_limit, mesh_limit);
        }
        let mut reserve = mesh_limit / 4;
        if mesh_limit > 1 && reserve == 0 {
            reserve = 1;
        }
        if reserve >= mesh_limit {
            reserve = mesh_limit - 1;
        }
        (mesh_limit, mesh_limit - reserve, reserve)
    }

    fn has_all_neighbors(&self, store: &ChunkStore, coord: ChunkCoord) -> bool {
        for direction in ALL_DIRECTIONS {
            let offset = direction.offset();
            let neighbor = coord.offset(offset.x, offset.y, offset.z);
            if store.get(neighbor).is_some() {
                continue;
            }
            // Neighbors outside the desired set will never arrive; edge
            // chunks of the visible region mesh without them.
            if !self.desired_set.contains(&neighbor) {
                continue;
            }
            return false;
        }
        true
    }

    fn enqueue_generation(&mut self, coord: ChunkCoord, generator: &Arc<dyn WorldGenerator>) {
        if self.in_flight_gen >= effective_limit(self.config.gen_queue_limit) {
            return;
        }

        self.states.insert(coord, ChunkState::QueuedGen);
        self.in_flight_gen += 1;

        let cancel = Arc::new(AtomicBool::new(false));
        self.gen_cancel.insert(coord, Arc::clone(&cancel));
        let generator = Arc::clone(generator);
        let tx = self.gen_tx.clone();
        self.gen_pool.execute(move || {
            if cancel.load(AtomicOrdering::Relaxed) {
                let _ = tx.send(GenResult {
                    coord,
                    blocks: empty_chunk_blocks(),
                    world_gen_version: 0,
                    cancelled: true,
                    cancel_token: cancel,
                });
                return;
            }

            let mut blocks = empty_chunk_blocks();
            generator.generate(coord, &mut blocks, &cancel);
            let cancelled = cancel.load(AtomicOrdering::Relaxed);
            let _ = tx.send(GenResult {
                coord,
                blocks,
                world_gen_version: generator.config().version,
                cancelled,
                cancel_token: cancel,
            });
        });
    }

    fn enqueue_mesh(
        &mut self,
        coord: ChunkCoord,
        store: &mut ChunkStore,
        registry: &Arc<BlockRegistry>,
        kind: MeshRequestKind,
    ) {
        if self.in_flight_mesh >= effective_limit(self.config.mesh_queue_limit) {
            return;
        }
        if self.mesh_in_flight.contains_key(&coord) {
            return;
        }

        let revision = {
            let Some(chunk) = store.get_mut(coord) else {
                return;
            };
            chunk.clear_mesh_dirty();
            chunk.mesh_revision()
        };

        // Snapshot the one-block-padded neighborhood; the worker never
        // touches the store.
        let mut padded = empty_padded_blocks();
        let neighbor_index = |dx: i32, dy: i32, dz: i32| ((dx + 1) + (dy + 1) * 3 + (dz + 1) * 9) as usize;
        let mut neighbors: [Option<&strata_schemas::voxel::chunk::Chunk>; 27] = [None; 27];
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    neighbors[neighbor_index(dx, dy, dz)] = store.get(coord.offset(dx, dy, dz));
                }
            }
        }
        for pz in 0..PADDED_DIMZ {
            for py in 0..PADDED_DIMZ {
                for px in 0..PADDED_DIMZ {
                    let mut source = [0i32; 3];
                    let mut local = [px as i32 - 1, py as i32 - 1, pz as i32 - 1];
                    for axis in 0..3 {
                        if local[axis] < 0 {
                            source[axis] = -1;
                            local[axis] += CHUNK_DIM;
                        } else if local[axis] >= CHUNK_DIM {
                            source[axis] = 1;
                            local[axis] -= CHUNK_DIM;
                        }
                    }
                    let state = neighbors[neighbor_index(source[0], source[1], source[2])]
                        .map(|chunk| {
                            chunk.get(
                                strata_schemas::coordinates::InChunkPos::try_new(local[0], local[1], local[2])
                                    .expect("wrapped into chunk bounds"),
                            )
                        })
                        .unwrap_or(BlockState::AIR);
                    padded[px + py * PADDED_DIMZ + pz * PADDED_DIMZ * PADDED_DIMZ] = state;
                }
            }
        }

        self.states.insert(coord, ChunkState::QueuedMesh);
        self.in_flight_mesh += 1;
        self.mesh_in_flight.insert(coord, kind);
        match kind {
            MeshRequestKind::Missing => self.in_flight_mesh_missing += 1,
            MeshRequestKind::Dirty => self.in_flight_mesh_dirty += 1,
        }

        let mesher = Arc::clone(&self.mesher);
        let registry = Arc::clone(registry);
        let tx = self.mesh_tx.clone();
        self.mesh_pool.execute(move || {
            let mesh = mesher.build(&padded, &registry);
            let _ = tx.send(MeshResult {
                coord,
                revision,
                empty: mesh.is_empty(),
                mesh,
            });
        });
    }

    /// Applies queued worker completions: loader payloads first, then
    /// generator results, then mesh results, each under its budget.
    /// Completions beyond the budgets stay queued for the next frame.
    pub fn process_completions(&mut self, deps: &mut StreamingDeps<'_>) {
        let load_budget = self.config.load_apply_budget_per_frame;
        if let Some(loader) = deps.loader.as_deref_mut() {
            loader.drain_completions(deps.store, load_budget);
        }
        let budget = effective_limit(self.config.apply_budget_per_frame);
        self.apply_gen_completions(budget, deps);
        self.apply_mesh_completions(budget, deps);
    }

    fn apply_gen_completions(&mut self, budget: usize, deps: &mut StreamingDeps<'_>) {
        let mut applied = 0usize;
        while applied < budget {
            let Ok(result) = self.gen_rx.try_recv() else {
                break;
            };
            self.in_flight_gen = self.in_flight_gen.saturating_sub(1);

            if let Some(flag) = self.gen_cancel.get(&result.coord) {
                if Arc::ptr_eq(flag, &result.cancel_token) {
                    self.gen_cancel.remove(&result.coord);
                }
            }

            if result.cancelled || result.cancel_token.load(AtomicOrdering::Relaxed) {
                continue;
            }
            if self.states.get(&result.coord) != Some(&ChunkState::QueuedGen) {
                continue;
            }

            let empty = {
                let chunk = deps.store.get_or_create(result.coord);
                let replaced = chunk.copy_from_sanitized(
                    &result.blocks,
                    deps.registry,
                    self.config.unknown_block_placeholder,
                );
                if replaced > 0 && !self.warned_unknown_blocks {
                    self.warned_unknown_blocks = true;
                    warn!(
                        coord = %result.coord,
                        replaced,
                        "Generator produced unknown block IDs, substituting placeholder"
                    );
                }
                chunk.clear_persist_dirty();
                chunk.set_loaded_from_disk(false);
                chunk.set_world_gen_version(result.world_gen_version);
                chunk.is_empty()
            };

            if empty {
                deps.meshes.remove(result.coord);
                if let Some(chunk) = deps.store.get_mut(result.coord) {
                    chunk.clear_mesh_dirty();
                }
                self.states.insert(result.coord, ChunkState::ReadyMesh);
            } else {
                self.states.insert(result.coord, ChunkState::ReadyData);
            }

            for direction in ALL_DIRECTIONS {
                let offset = direction.offset();
                if let Some(neighbor) = deps.store.get_mut(result.coord.offset(offset.x, offset.y, offset.z)) {
                    neighbor.mark_mesh_dirty();
                }
            }
            applied += 1;
        }
    }

    fn apply_mesh_completions(&mut self, budget: usize, deps: &mut StreamingDeps<'_>) {
        let mut applied = 0usize;
        while applied < budget {
            let Ok(result) = self.mesh_rx.try_recv() else {
                break;
            };
            self.in_flight_mesh = self.in_flight_mesh.saturating_sub(1);
            if let Some(kind) = self.mesh_in_flight.remove(&result.coord) {
                match kind {
                    MeshRequestKind::Missing => {
                        self.in_flight_mesh_missing = self.in_flight_mesh_missing.saturating_sub(1);
                    }
                    MeshRequestKind::Dirty => {
                        self.in_flight_mesh_dirty = self.in_flight_mesh_dirty.saturating_sub(1);
                    }
                }
            }

            if self.states.get(&result.coord) != Some(&ChunkState::QueuedMesh) {
                continue;
            }
            let Some(chunk) = deps.store.get(result.coord) else {
                self.states.remove(&result.coord);
                continue;
            };

            if chunk.mesh_revision() != result.revision {
                // The chunk changed while the job ran; never install a stale mesh.
                self.states.insert(result.coord, ChunkState::ReadyData);
                continue;
            }

            let needs_remesh = chunk.is_mesh_dirty();
            if result.empty {
                deps.meshes.remove(result.coord);
            } else {
                deps.meshes.set(result.coord, result.mesh);
            }
            if needs_remesh {
                self.states.insert(result.coord, ChunkState::ReadyData);
            } else {
                if let Some(chunk) = deps.store.get_mut(result.coord) {
                    chunk.clear_mesh_dirty();
                }
                self.states.insert(result.coord, ChunkState::ReadyMesh);
            }
            applied += 1;
        }
    }

    /// Clears all scheduler state, cancelling queued generation and pending
    /// loads and discarding undrained completions.
    pub fn reset(&mut self, mut loader: Option<&mut AsyncChunkLoader>) {
        self.states.clear();
        self.in_flight_gen = 0;
        self.in_flight_mesh = 0;
        self.in_flight_mesh_missing = 0;
        self.in_flight_mesh_dirty = 0;
        self.mesh_in_flight.clear();
        self.cache = LruCache::unbounded();
        self.desired.clear();
        self.desired_set.clear();
        if let Some(loader) = loader.as_deref_mut() {
            for coord in self.load_pending.drain() {
                loader.cancel(coord);
            }
        } else {
            self.load_pending.clear();
        }
        self.last_center = None;
        self.last_view_distance = -1;
        self.last_unload_distance = -1;
        self.dirty_cursor = 0;
        for flag in self.gen_cancel.values() {
            flag.store(true, AtomicOrdering::Relaxed);
        }
        self.gen_cancel.clear();
        while self.gen_rx.try_recv().is_ok() {}
        while self.mesh_rx.try_recv().is_ok() {}
    }

    /// Current per-coordinate scheduler states, refined with the
    /// loaded-from-disk marker for debug visualization.
    pub fn chunk_state_list(&self, store: &ChunkStore) -> Vec<(ChunkCoord, ChunkDebugState)> {
        let mut out = Vec::with_capacity(self.states.len());
        for (&coord, &state) in &self.states {
            let debug_state = match state {
                ChunkState::QueuedGen => ChunkDebugState::QueuedGen,
                ChunkState::ReadyData => {
                    if store.get(coord).is_some_and(|c| c.loaded_from_disk()) {
                        ChunkDebugState::LoadedFromDisk
                    } else {
                        ChunkDebugState::ReadyData
                    }
                }
                ChunkState::QueuedMesh => ChunkDebugState::QueuedMesh,
                ChunkState::ReadyMesh => ChunkDebugState::ReadyMesh,
            };
            out.push((coord, debug_state));
        }
        out
    }

    /// Snapshot of queue occupancy across all stages.
    pub fn queue_pressure(&self) -> QueuePressure {
        let mut pressure = QueuePressure {
            in_flight_generation: self.in_flight_gen,
            in_flight_meshing: self.in_flight_mesh,
            pending_loads: self.load_pending.len(),
            ..QueuePressure::default()
        };
        for state in self.states.values() {
            match state {
                ChunkState::QueuedGen => pressure.queued_generation += 1,
                ChunkState::QueuedMesh => pressure.queued_meshing += 1,
                ChunkState::ReadyData => pressure.ready_for_meshing += 1,
                ChunkState::ReadyMesh => {}
            }
        }

        let gen_limit = effective_limit(self.config.gen_queue_limit);
        let mesh_limit = effective_limit(self.config.mesh_queue_limit);
        let gen_saturated = gen_limit != usize::MAX && pressure.in_flight_generation >= gen_limit;
        let mesh_saturated = mesh_limit != usize::MAX && pressure.in_flight_meshing >= mesh_limit;
        pressure.overloaded = gen_saturated
            || mesh_saturated
            || pressure.pending_loads > 0
            || pressure.queued_generation > 0
            || pressure.ready_for_meshing > 0
            || pressure.queued_meshing > 0;
        pressure
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::voxel::mesher::CulledMesher;

    #[test]
    fn mesh_budget_partition_reserves_remesh_quota() {
        let streamer = ChunkStreamer::new(
            StreamConfig {
                mesh_queue_limit: 8,
                worker_threads: 0,
                ..StreamConfig::default()
            },
            Arc::new(CulledMesher),
        );
        let (total, missing, dirty) = streamer.mesh_limits();
        assert_eq!(total, 8);
        assert_eq!(missing, 6);
        assert_eq!(dirty, 2);

        let streamer = ChunkStreamer::new(
            StreamConfig {
                mesh_queue_limit: 2,
                worker_threads: 0,
                ..StreamConfig::default()
            },
            Arc::new(CulledMesher),
        );
        assert_eq!(streamer.mesh_limits(), (2, 1, 1));

        let streamer = ChunkStreamer::new(
            StreamConfig {
                mesh_queue_limit: 0,
                worker_threads: 0,
                ..StreamConfig::default()
            },
            Arc::new(CulledMesher),
        );
        assert_eq!(streamer.mesh_limits(), (usize::MAX, usize::MAX, usize::MAX));
    }

    #[test]
    fn observer_chunk_uses_floor_division() {
        assert_eq!(ChunkStreamer::observer_chunk(Vec3::new(0.5, 0.5, 0.5)), ChunkCoord::ZERO);
        assert_eq!(
            ChunkStreamer::observer_chunk(Vec3::new(-0.5, 32.0, -32.5)),
            ChunkCoord::new(-1, 1, -2)
        );
    }

    #[test]
    fn pressure_is_quiet_when_idle() {
        let streamer = ChunkStreamer::new(
            StreamConfig {
                worker_threads: 0,
                ..StreamConfig::default()
            },
            Arc::new(CulledMesher),
        );
        let pressure = streamer.queue_pressure();
        assert!(!pressure.overloaded);
        assert_eq!(pressure.in_flight_generation, 0);
    }
}
