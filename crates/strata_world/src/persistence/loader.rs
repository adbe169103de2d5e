//! Asynchronous region-backed chunk loading.
//!
//! Region files are read and decoded on an I/O pool and cached whole;
//! per-chunk payloads are assembled on a worker pool by base-filling the
//! chunk from the world generator and overlaying the region's stored spans.
//! The main thread drains completions once per frame under a budget and
//! installs payloads into the chunk store, unless a local edit raced the
//! load, in which case the edit wins and the payload is dropped.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use kstring::KString;
use lru::LruCache;
use smallvec::SmallVec;
use strata_schemas::coordinates::ChunkCoord;
use strata_schemas::region::{ChunkRegionSnapshot, RegionKey, RegionLayout};
use strata_schemas::voxel::block::{BlockState, ALL_DIRECTIONS};
use strata_schemas::voxel::chunk::{empty_chunk_blocks, Chunk, ChunkBlocks};
use strata_schemas::voxel::registry::BlockRegistry;
use tracing::warn;

use crate::config::{effective_limit, StreamConfig};
use crate::persistence::region_container::ChunkRegionContainer;
use crate::prelude::*;
use crate::tasks::WorkerPool;
use crate::voxel::chunk_store::ChunkStore;
use crate::voxel::generator::WorldGenerator;

/// How long a negative presence probe suppresses re-probing a region.
const PRESENCE_BACKOFF: Duration = Duration::from_secs(2);

/// A cached region with indices for per-chunk payload assembly.
struct RegionEntry {
    region: Arc<ChunkRegionSnapshot>,
    present: HashSet<ChunkCoord>,
    spans_by_coord: HashMap<ChunkCoord, SmallVec<[usize; 8]>>,
}

impl RegionEntry {
    fn from_snapshot(snapshot: ChunkRegionSnapshot) -> Self {
        let region = Arc::new(snapshot);
        let mut present = HashSet::with_capacity(region.chunks.len());
        let mut spans_by_coord: HashMap<ChunkCoord, SmallVec<[usize; 8]>> =
            HashMap::with_capacity(region.chunks.len());
        for (index, snapshot) in region.chunks.iter().enumerate() {
            let coord = snapshot.data.span.chunk;
            present.insert(coord);
            spans_by_coord.entry(coord).or_default().push(index);
        }
        Self {
            region,
            present,
            spans_by_coord,
        }
    }

    fn empty(key: RegionKey) -> Self {
        Self::from_snapshot(ChunkRegionSnapshot::empty(key))
    }
}

struct RegionResult {
    key: RegionKey,
    entry: Option<RegionEntry>,
}

struct ChunkPayload {
    coord: ChunkCoord,
    blocks: ChunkBlocks,
    world_gen_version: u32,
    loaded_from_disk: bool,
}

struct RegionPresence {
    exists: bool,
    next_check: Instant,
}

/// Diagnostic counters for the loader's queues.
#[derive(Copy, Clone, Default, Debug)]
pub struct LoaderStats {
    /// Chunks requested and not yet applied or cancelled.
    pub pending_chunks: usize,
    /// Region reads currently outstanding on the I/O pool.
    pub in_flight_regions: usize,
    /// Regions held in the LRU cache.
    pub cached_regions: usize,
    /// Payload builds currently outstanding on the worker pool.
    pub payloads_in_flight: usize,
}

/// Bridges the region persistence backend to the chunk store.
pub struct AsyncChunkLoader {
    container: Arc<ChunkRegionContainer>,
    layout: Arc<dyn RegionLayout>,
    generator: Arc<dyn WorldGenerator>,
    registry: Arc<BlockRegistry>,
    zone_id: KString,
    placeholder: BlockState,

    max_cached_regions: usize,
    max_in_flight_regions: usize,
    load_queue_limit: usize,
    prefetch_radius: i32,

    io_pool: WorkerPool,
    worker_pool: WorkerPool,
    region_tx: Sender<RegionResult>,
    region_rx: Receiver<RegionResult>,
    payload_tx: Sender<ChunkPayload>,
    payload_rx: Receiver<ChunkPayload>,

    cache: LruCache<RegionKey, RegionEntry>,
    in_flight: HashSet<RegionKey>,
    region_pending: HashMap<RegionKey, HashSet<ChunkCoord>>,
    pending_chunks: HashSet<ChunkCoord>,
    payload_in_flight: HashSet<ChunkCoord>,
    presence: HashMap<RegionKey, RegionPresence>,
    warned_unknown_blocks: bool,
}

impl AsyncChunkLoader {
    /// Constructs a loader over the given container. The generator is
    /// required: payload builds base-fill uncovered voxels with procedural
    /// content so partially persisted chunks match their surroundings.
    pub fn new(
        container: Arc<ChunkRegionContainer>,
        generator: Arc<dyn WorldGenerator>,
        registry: Arc<BlockRegistry>,
        zone_id: KString,
        config: &StreamConfig,
    ) -> Self {
        let layout = Arc::clone(container.layout());
        let (region_tx, region_rx) = crossbeam_channel::unbounded();
        let (payload_tx, payload_rx) = crossbeam_channel::unbounded();
        Self {
            container,
            layout,
            generator,
            registry,
            zone_id,
            placeholder: config.unknown_block_placeholder,
            max_cached_regions: config.max_cached_regions,
            max_in_flight_regions: config.max_in_flight_regions,
            load_queue_limit: config.load_queue_limit,
            prefetch_radius: config.prefetch_radius,
            io_pool: WorkerPool::new("region-io", config.io_threads),
            worker_pool: WorkerPool::new("chunk-load", config.load_worker_threads),
            region_tx,
            region_rx,
            payload_tx,
            payload_rx,
            cache: LruCache::unbounded(),
            in_flight: HashSet::new(),
            region_pending: HashMap::new(),
            pending_chunks: HashSet::new(),
            payload_in_flight: HashSet::new(),
            presence: HashMap::new(),
            warned_unknown_blocks: false,
        }
    }

    /// Asks the loader to produce the chunk at `coord` from persistence.
    ///
    /// Returns true if a load is newly initiated or already progressing;
    /// false when the queue limit is reached, the cached region does not
    /// contain the chunk, or the region is known not to exist (within the
    /// presence backoff window).
    pub fn request(&mut self, coord: ChunkCoord) -> bool {
        if self.pending_chunks.contains(&coord) {
            return true;
        }
        if self.load_queue_limit > 0 && self.pending_chunks.len() >= self.load_queue_limit {
            return false;
        }

        let key = self.layout.region_for_chunk(&self.zone_id, coord);
        if let Some(entry) = self.cache.get(&key) {
            if !entry.present.contains(&coord) {
                return false;
            }
            let region = Arc::clone(&entry.region);
            let spans = entry.spans_by_coord.get(&coord).cloned().unwrap_or_default();
            self.pending_chunks.insert(coord);
            self.queue_payload_build(coord, region, spans);
            return true;
        }

        if !self.in_flight.contains(&key) && !self.region_may_exist(&key) {
            return false;
        }

        self.pending_chunks.insert(coord);
        self.region_pending.entry(key.clone()).or_default().insert(coord);
        if self.queue_region_load(key.clone()) {
            self.prefetch_neighbors(&key);
        }
        true
    }

    /// Whether a request for `coord` is still progressing.
    pub fn is_pending(&self, coord: ChunkCoord) -> bool {
        self.pending_chunks.contains(&coord)
    }

    /// Forgets a pending request. In-flight region reads are not cancelled;
    /// their results simply stop mattering for this coordinate.
    pub fn cancel(&mut self, coord: ChunkCoord) {
        self.pending_chunks.remove(&coord);
        let key = self.layout.region_for_chunk(&self.zone_id, coord);
        let emptied = self
            .region_pending
            .get_mut(&key)
            .map(|pending| {
                pending.remove(&coord);
                pending.is_empty()
            })
            .unwrap_or(false);
        if emptied {
            self.region_pending.remove(&key);
        }
    }

    /// Drains completions: first every finished region read (updating the
    /// cache and dispatching payload builds for surviving requests), then up
    /// to `budget` finished payloads into the chunk store (0 = unlimited).
    pub fn drain_completions(&mut self, store: &mut ChunkStore, budget: usize) {
        self.drain_region_completions();
        self.drain_payload_completions(store, budget);
    }

    /// Current queue counters.
    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            pending_chunks: self.pending_chunks.len(),
            in_flight_regions: self.in_flight.len(),
            cached_regions: self.cache.len(),
            payloads_in_flight: self.payload_in_flight.len(),
        }
    }

    /// Whether the presence cache currently believes the region exists.
    pub fn presence_exists(&self, key: &RegionKey) -> Option<bool> {
        self.presence.get(key).map(|p| p.exists)
    }

    fn drain_region_completions(&mut self) {
        while let Ok(result) = self.region_rx.try_recv() {
            self.in_flight.remove(&result.key);
            let entry = match result.entry {
                Some(entry) => {
                    self.presence.insert(
                        result.key.clone(),
                        RegionPresence {
                            exists: true,
                            next_check: Instant::now(),
                        },
                    );
                    entry
                }
                None => {
                    warn!(region = %result.key, "Region load failed, treating as empty");
                    RegionEntry::empty(result.key.clone())
                }
            };

            let mut builds: Vec<(ChunkCoord, Arc<ChunkRegionSnapshot>, SmallVec<[usize; 8]>)> = Vec::new();
            if let Some(pending) = self.region_pending.remove(&result.key) {
                for coord in pending {
                    if !entry.present.contains(&coord) {
                        self.pending_chunks.remove(&coord);
                        continue;
                    }
                    let spans = entry.spans_by_coord.get(&coord).cloned().unwrap_or_default();
                    builds.push((coord, Arc::clone(&entry.region), spans));
                }
            }

            self.cache.put(result.key, entry);
            self.evict_cache_if_needed();

            for (coord, region, spans) in builds {
                self.queue_payload_build(coord, region, spans);
            }
        }
    }

    fn drain_payload_completions(&mut self, store: &mut ChunkStore, budget: usize) {
        let budget = effective_limit(budget);
        let mut applied = 0usize;
        while applied < budget {
            let Ok(payload) = self.payload_rx.try_recv() else {
                break;
            };
            self.payload_in_flight.remove(&payload.coord);
            if !self.pending_chunks.remove(&payload.coord) {
                // Cancelled while the build was in flight.
                continue;
            }
            self.apply_payload(store, payload);
            applied += 1;
        }
    }

    fn apply_payload(&mut self, store: &mut ChunkStore, payload: ChunkPayload) -> bool {
        {
            let chunk = store.get_or_create(payload.coord);
            if chunk.is_persist_dirty() {
                // A local edit raced the load; the edit wins.
                return false;
            }
            let replaced =
                chunk.copy_from_sanitized(&payload.blocks, &self.registry, self.placeholder);
            if replaced > 0 && !self.warned_unknown_blocks {
                self.warned_unknown_blocks = true;
                warn!(
                    coord = %payload.coord,
                    replaced,
                    "Loaded chunk references unknown block IDs, substituting placeholder"
                );
            }
            chunk.set_world_gen_version(payload.world_gen_version);
            chunk.clear_persist_dirty();
            chunk.clear_mesh_dirty();
            chunk.set_loaded_from_disk(payload.loaded_from_disk);
        }

        for direction in ALL_DIRECTIONS {
            let offset = direction.offset();
            if let Some(neighbor) = store.get_mut(payload.coord.offset(offset.x, offset.y, offset.z)) {
                neighbor.mark_mesh_dirty();
            }
        }
        true
    }

    fn queue_region_load(&mut self, key: RegionKey) -> bool {
        if self.cache.contains(&key) || self.in_flight.contains(&key) {
            return false;
        }
        if self.max_in_flight_regions > 0 && self.in_flight.len() >= self.max_in_flight_regions {
            return false;
        }

        self.in_flight.insert(key.clone());
        let container = Arc::clone(&self.container);
        let tx = self.region_tx.clone();
        self.io_pool.execute(move || {
            let entry = match container.load_region(&key) {
                Ok(snapshot) => Some(RegionEntry::from_snapshot(snapshot)),
                Err(e) => {
                    warn!(region = %key, "Async region load failed: {e}");
                    None
                }
            };
            let _ = tx.send(RegionResult { key, entry });
        });
        true
    }

    fn queue_payload_build(
        &mut self,
        coord: ChunkCoord,
        region: Arc<ChunkRegionSnapshot>,
        span_indices: SmallVec<[usize; 8]>,
    ) {
        if span_indices.is_empty() || self.payload_in_flight.contains(&coord) {
            return;
        }
        self.payload_in_flight.insert(coord);
        let generator = Arc::clone(&self.generator);
        let tx = self.payload_tx.clone();
        self.worker_pool.execute(move || {
            let mut chunk = Chunk::new();
            let needs_base_fill = span_indices
                .iter()
                .any(|&index| !region.chunks[index].data.span.is_full_chunk());
            if needs_base_fill {
                let mut blocks = empty_chunk_blocks();
                let cancel = AtomicBool::new(false);
                generator.generate(coord, &mut blocks, &cancel);
                chunk.copy_from(&blocks);
            }
            for &index in &span_indices {
                region.chunks[index].data.apply_to(&mut chunk);
            }
            let _ = tx.send(ChunkPayload {
                coord,
                blocks: chunk.copy_blocks(),
                world_gen_version: generator.config().version,
                loaded_from_disk: true,
            });
        });
    }

    fn prefetch_neighbors(&mut self, center: &RegionKey) {
        let radius = self.prefetch_radius;
        if radius <= 0 {
            return;
        }
        for dz in -radius..=radius {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if (dx, dy, dz) == (0, 0, 0) {
                        continue;
                    }
                    let neighbor = center.offset(dx, dy, dz);
                    if self.cache.contains(&neighbor) || self.in_flight.contains(&neighbor) {
                        continue;
                    }
                    if !self.region_may_exist(&neighbor) {
                        continue;
                    }
                    self.queue_region_load(neighbor);
                }
            }
        }
    }

    fn region_may_exist(&mut self, key: &RegionKey) -> bool {
        let now = Instant::now();
        if let Some(presence) = self.presence.get(key) {
            if presence.exists {
                return true;
            }
            if now < presence.next_check {
                return false;
            }
        }
        let exists = self.container.region_exists(key);
        self.presence.insert(
            key.clone(),
            RegionPresence {
                exists,
                next_check: if exists { now } else { now + PRESENCE_BACKOFF },
            },
        );
        exists
    }

    fn evict_cache_if_needed(&mut self) {
        if self.max_cached_regions == 0 {
            return;
        }
        while self.cache.len() > self.max_cached_regions {
            self.cache.pop_lru();
        }
    }
}

#[cfg(test)]
mod test {
    use strata_schemas::coordinates::{BlockPos, InChunkPos};
    use strata_schemas::region::{ChunkData, ChunkSnapshot, SubchunkRegionLayout, DEFAULT_ZONE_ID};
    use strata_schemas::voxel::block::BlockId;
    use strata_schemas::voxel::registry::BlockType;

    use super::*;
    use crate::storage::MemoryBackend;
    use crate::voxel::generator::{FlatWorldGenerator, WorldGenConfig};

    fn test_config() -> StreamConfig {
        StreamConfig {
            io_threads: 0,
            load_worker_threads: 0,
            prefetch_radius: 0,
            ..StreamConfig::default()
        }
    }

    fn setup(config: &StreamConfig) -> (AsyncChunkLoader, Arc<ChunkRegionContainer>, Arc<BlockRegistry>) {
        let mut registry = BlockRegistry::new();
        registry.register(BlockType::solid("stone")).unwrap();
        let registry = Arc::new(registry);
        let container = Arc::new(ChunkRegionContainer::new(
            Arc::new(MemoryBackend::new()),
            "world",
            Arc::new(SubchunkRegionLayout),
            false,
        ));
        let generator = Arc::new(FlatWorldGenerator::new(
            WorldGenConfig::default(),
            0,
            BlockState::new(BlockId(1)),
        ));
        let loader = AsyncChunkLoader::new(
            Arc::clone(&container),
            generator,
            Arc::clone(&registry),
            KString::from_static(DEFAULT_ZONE_ID),
            config,
        );
        (loader, container, registry)
    }

    fn persist_chunk(container: &ChunkRegionContainer, coord: ChunkCoord, state: BlockState) {
        let layout = SubchunkRegionLayout;
        let mut chunk = Chunk::new();
        chunk.put(InChunkPos::try_new(1, 2, 3).unwrap(), state);
        let key = layout.region_for_chunk(DEFAULT_ZONE_ID, coord);
        let mut region = container.load_region(&key).unwrap();
        for storage_key in layout.storage_keys_for_chunk(coord) {
            let span = layout.span_for_storage_key(storage_key);
            let data = ChunkData::from_chunk(&chunk, span);
            if data.is_all_air() {
                continue;
            }
            region.chunks.push(ChunkSnapshot {
                key: storage_key,
                data,
            });
        }
        container.save_region(&region).unwrap();
    }

    #[test]
    fn absent_region_declines_within_backoff() {
        let config = test_config();
        let (mut loader, _, _) = setup(&config);
        let coord = ChunkCoord::new(50, 0, 0);
        assert!(!loader.request(coord));
        assert!(!loader.is_pending(coord));
        // Second probe is suppressed by the backoff window.
        assert!(!loader.request(coord));
        let key = SubchunkRegionLayout.region_for_chunk(DEFAULT_ZONE_ID, coord);
        assert_eq!(loader.presence_exists(&key), Some(false));
    }

    #[test]
    fn request_loads_persisted_chunk() {
        let config = test_config();
        let (mut loader, container, _) = setup(&config);
        let coord = ChunkCoord::new(0, 0, 0);
        let marker = BlockState::new(BlockId(1));
        persist_chunk(&container, coord, marker);

        assert!(loader.request(coord));
        assert!(loader.is_pending(coord));

        let mut store = ChunkStore::new();
        loader.drain_completions(&mut store, 0);
        assert!(!loader.is_pending(coord));
        let chunk = store.get(coord).expect("chunk applied");
        assert!(chunk.loaded_from_disk());
        assert!(!chunk.is_persist_dirty());
        assert_eq!(chunk.get(InChunkPos::try_new(1, 2, 3).unwrap()), marker);

        let key = SubchunkRegionLayout.region_for_chunk(DEFAULT_ZONE_ID, coord);
        assert_eq!(loader.presence_exists(&key), Some(true));
    }

    #[test]
    fn payload_base_fills_from_generator() {
        let config = test_config();
        let (mut loader, container, _) = setup(&config);
        // Ground below y=0, so chunk (0,-1,0) is generator-solid; persist a
        // single edited subchunk and expect the rest base-filled.
        let coord = ChunkCoord::new(0, -1, 0);
        let layout = SubchunkRegionLayout;
        let key = layout.region_for_chunk(DEFAULT_ZONE_ID, coord);
        let storage_key = layout.storage_keys_for_chunk(coord)[0];
        let span = layout.span_for_storage_key(storage_key);
        let mut edited = Chunk::new();
        // A single air hole in an otherwise solid span would not persist the
        // other subchunks, exactly the partial-coverage case.
        edited.put(InChunkPos::try_new(0, 0, 0).unwrap(), BlockState::new(BlockId(1)));
        let region = ChunkRegionSnapshot {
            key: key.clone(),
            chunks: vec![ChunkSnapshot {
                key: storage_key,
                data: ChunkData::from_chunk(&edited, span),
            }],
        };
        container.save_region(&region).unwrap();

        assert!(loader.request(coord));
        let mut store = ChunkStore::new();
        loader.drain_completions(&mut store, 0);
        let chunk = store.get(coord).expect("chunk applied");
        // Covered voxel comes from the span (air except one block).
        assert!(chunk.get(InChunkPos::try_new(1, 1, 1).unwrap()).is_air());
        assert_eq!(
            chunk.get(InChunkPos::try_new(0, 0, 0).unwrap()),
            BlockState::new(BlockId(1))
        );
        // Uncovered voxel is base-filled from the generator.
        assert_eq!(
            chunk.get(InChunkPos::try_new(31, 31, 31).unwrap()),
            BlockState::new(BlockId(1))
        );
    }

    #[test]
    fn local_edit_wins_over_late_payload() {
        let config = test_config();
        let (mut loader, container, _) = setup(&config);
        let coord = ChunkCoord::new(0, 0, 0);
        persist_chunk(&container, coord, BlockState::new(BlockId(1)));

        assert!(loader.request(coord));
        let mut store = ChunkStore::new();
        // Edit lands between the request and the drain.
        let edit = BlockState {
            id: BlockId(1),
            metadata: 9,
            light: 0,
        };
        store.set_block(BlockPos::new(1, 2, 3), edit);
        loader.drain_completions(&mut store, 0);

        let chunk = store.get(coord).unwrap();
        assert!(chunk.is_persist_dirty());
        assert!(!chunk.loaded_from_disk());
        assert_eq!(chunk.get(InChunkPos::try_new(1, 2, 3).unwrap()), edit);
    }

    #[test]
    fn cancel_drops_pending_payload() {
        let config = test_config();
        let (mut loader, container, _) = setup(&config);
        let coord = ChunkCoord::new(0, 0, 0);
        persist_chunk(&container, coord, BlockState::new(BlockId(1)));

        assert!(loader.request(coord));
        loader.cancel(coord);
        assert!(!loader.is_pending(coord));

        let mut store = ChunkStore::new();
        loader.drain_completions(&mut store, 0);
        assert!(store.get(coord).is_none());
    }

    #[test]
    fn queue_limit_applies_back_pressure() {
        let config = StreamConfig {
            load_queue_limit: 1,
            ..test_config()
        };
        let (mut loader, container, _) = setup(&config);
        persist_chunk(&container, ChunkCoord::new(0, 0, 0), BlockState::new(BlockId(1)));
        persist_chunk(&container, ChunkCoord::new(0, 0, 1), BlockState::new(BlockId(1)));

        assert!(loader.request(ChunkCoord::new(0, 0, 0)));
        assert!(!loader.request(ChunkCoord::new(0, 0, 1)), "queue full");
        // The pending coordinate itself keeps reporting progress.
        assert!(loader.request(ChunkCoord::new(0, 0, 0)));
    }

    #[test]
    fn cache_eviction_respects_limit() {
        let config = StreamConfig {
            max_cached_regions: 1,
            ..test_config()
        };
        let (mut loader, container, _) = setup(&config);
        // Two chunks in different regions.
        persist_chunk(&container, ChunkCoord::new(0, 0, 0), BlockState::new(BlockId(1)));
        persist_chunk(&container, ChunkCoord::new(8, 0, 0), BlockState::new(BlockId(1)));

        let mut store = ChunkStore::new();
        assert!(loader.request(ChunkCoord::new(0, 0, 0)));
        loader.drain_completions(&mut store, 0);
        assert!(loader.request(ChunkCoord::new(8, 0, 0)));
        loader.drain_completions(&mut store, 0);
        assert_eq!(loader.stats().cached_regions, 1);
        assert_eq!(store.len(), 2);
    }
}
