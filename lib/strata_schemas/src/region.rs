//! Persistence wire types: region keys, chunk spans and region snapshots,
//! plus the layout mapping runtime chunks onto on-disk storage keys.
//!
//! The on-disk grain is finer than the runtime chunk: a 32³ runtime chunk is
//! persisted as eight 16³ subchunk spans, and a region groups a 16³ cube of
//! subchunks (8³ runtime chunks) into one file.

use std::fmt::{Display, Formatter};

use bevy_math::IVec3;
use kstring::KString;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::coordinates::{ChunkCoord, InChunkPos, CHUNK_DIM};
use crate::voxel::block::BlockState;
use crate::voxel::chunk::Chunk;

/// Side length of an on-disk subchunk span in blocks.
pub const SUBCHUNK_DIM: i32 = 16;
/// Subchunks along each axis of a runtime chunk.
pub const SUBCHUNKS_PER_AXIS: i32 = CHUNK_DIM / SUBCHUNK_DIM;
/// Side length of a region in subchunks.
pub const REGION_SPAN: i32 = 16;
/// [`REGION_SPAN`] as a `usize`.
pub const REGION_SPANZ: usize = REGION_SPAN as usize;
/// Side length of a region in runtime chunks.
pub const REGION_CHUNK_SPAN: i32 = REGION_SPAN / SUBCHUNKS_PER_AXIS;
/// Number of (x, z) columns in a region's offset table.
pub const REGION_COLUMN_COUNT: usize = REGION_SPANZ * REGION_SPANZ;

/// The zone every world starts with.
pub const DEFAULT_ZONE_ID: &str = "strata:default";

/// Replaces `:` with `/` so a zone ID can be embedded into storage paths.
pub fn normalize_zone_id(zone_id: &str) -> String {
    zone_id.replace(':', "/")
}

/// Identifies one region file within a zone.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct RegionKey {
    /// The zone the region belongs to.
    pub zone: KString,
    /// Region grid X coordinate.
    pub x: i32,
    /// Region grid Y coordinate.
    pub y: i32,
    /// Region grid Z coordinate.
    pub z: i32,
}

impl RegionKey {
    /// Constructs a key from a zone ID and region grid position.
    pub fn new(zone: impl Into<KString>, x: i32, y: i32, z: i32) -> Self {
        Self {
            zone: zone.into(),
            x,
            y,
            z,
        }
    }

    /// The key displaced by the given region-grid offsets, within the same zone.
    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            zone: self.zone.clone(),
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }
}

impl Display for RegionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Region({} x={}, y={}, z={})", self.zone, self.x, self.y, self.z)
    }
}

/// Identifies one stored subchunk span on disk (subchunk grid coordinates).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
pub struct StorageChunkKey {
    /// Subchunk grid X coordinate.
    pub x: i32,
    /// Subchunk grid Y coordinate.
    pub y: i32,
    /// Subchunk grid Z coordinate.
    pub z: i32,
}

impl StorageChunkKey {
    /// Constructs a key from subchunk grid coordinates.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// A rectangular subvolume of a runtime chunk, in that chunk's local block
/// coordinates. A full chunk is the span with zero offset and
/// `size == CHUNK_DIM` on every axis.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct ChunkSpan {
    /// The runtime chunk the span belongs to.
    pub chunk: ChunkCoord,
    /// Minimum corner of the span within the chunk.
    pub offset: IVec3,
    /// Span extent per axis, in blocks.
    pub size: IVec3,
}

impl ChunkSpan {
    /// A span covering the whole given chunk.
    pub const fn full(chunk: ChunkCoord) -> Self {
        Self {
            chunk,
            offset: IVec3::ZERO,
            size: IVec3::splat(CHUNK_DIM),
        }
    }

    /// Whether the span covers its whole chunk.
    pub fn is_full_chunk(&self) -> bool {
        self.offset == IVec3::ZERO && self.size == IVec3::splat(CHUNK_DIM)
    }

    /// Number of blocks inside the span.
    pub fn volume(&self) -> usize {
        (self.size.x * self.size.y * self.size.z) as usize
    }
}

/// A span descriptor plus its linearized blocks, in span-local XYZ order.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ChunkData {
    /// Which subvolume of which chunk the blocks cover.
    pub span: ChunkSpan,
    /// `span.volume()` blocks, `x + y*size.x + z*size.x*size.y` linear order.
    pub blocks: Vec<BlockState>,
}

impl ChunkData {
    /// Extracts the given span's blocks out of a resident chunk.
    pub fn from_chunk(chunk: &Chunk, span: ChunkSpan) -> Self {
        let mut blocks = Vec::with_capacity(span.volume());
        for z in 0..span.size.z {
            for y in 0..span.size.y {
                for x in 0..span.size.x {
                    let pos = InChunkPos::try_from_ivec3(span.offset + IVec3::new(x, y, z))
                        .expect("span exceeds chunk bounds");
                    blocks.push(chunk.get(pos));
                }
            }
        }
        Self { span, blocks }
    }

    /// Writes the span's blocks into a resident chunk at the span offset.
    /// Out-of-range spans are clipped to the chunk volume.
    pub fn apply_to(&self, chunk: &mut Chunk) {
        let mut i = 0usize;
        for z in 0..self.span.size.z {
            for y in 0..self.span.size.y {
                for x in 0..self.span.size.x {
                    let Some(&state) = self.blocks.get(i) else {
                        return;
                    };
                    i += 1;
                    if let Ok(pos) = InChunkPos::try_from_ivec3(self.span.offset + IVec3::new(x, y, z)) {
                        chunk.put(pos, state);
                    }
                }
            }
        }
    }

    /// True if every block in the span is air. All-air spans are dropped
    /// from region snapshots on save.
    pub fn is_all_air(&self) -> bool {
        self.blocks.iter().all(|b| b.is_air())
    }
}

/// One stored span: its storage key and the covered blocks.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    /// The storage key addressing this span within its region.
    pub key: StorageChunkKey,
    /// The span data.
    pub data: ChunkData,
}

/// A region key plus every stored span in that region.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ChunkRegionSnapshot {
    /// The region's key.
    pub key: RegionKey,
    /// The stored spans, in unspecified order.
    pub chunks: Vec<ChunkSnapshot>,
}

impl ChunkRegionSnapshot {
    /// An empty snapshot for the given key.
    pub fn empty(key: RegionKey) -> Self {
        Self { key, chunks: Vec::new() }
    }
}

/// Maps runtime chunk coordinates onto region keys and storage keys.
///
/// Implementations must keep all storage keys of one chunk within one
/// region, so a chunk never straddles region files.
pub trait RegionLayout: Send + Sync {
    /// The region containing the given chunk.
    fn region_for_chunk(&self, zone: &str, coord: ChunkCoord) -> RegionKey;
    /// The storage keys covering the given chunk, one per subchunk span.
    fn storage_keys_for_chunk(&self, coord: ChunkCoord) -> SmallVec<[StorageChunkKey; 8]>;
    /// The span a storage key addresses.
    fn span_for_storage_key(&self, key: StorageChunkKey) -> ChunkSpan;
    /// Every chunk coordinate a region may contain.
    fn chunks_for_region(&self, key: &RegionKey) -> Vec<ChunkCoord>;
    /// Region side length in runtime chunks, used to scale prefetch radii.
    fn region_chunk_span(&self) -> i32;
}

/// The default fixed cubic tiling: 16³ subchunk spans, 16³-subchunk regions.
#[derive(Copy, Clone, Debug, Default)]
pub struct SubchunkRegionLayout;

impl RegionLayout for SubchunkRegionLayout {
    fn region_for_chunk(&self, zone: &str, coord: ChunkCoord) -> RegionKey {
        RegionKey::new(
            KString::from_ref(zone),
            coord.x.div_euclid(REGION_CHUNK_SPAN),
            coord.y.div_euclid(REGION_CHUNK_SPAN),
            coord.z.div_euclid(REGION_CHUNK_SPAN),
        )
    }

    fn storage_keys_for_chunk(&self, coord: ChunkCoord) -> SmallVec<[StorageChunkKey; 8]> {
        let base = IVec3::from(coord) * SUBCHUNKS_PER_AXIS;
        let mut keys = SmallVec::new();
        for dz in 0..SUBCHUNKS_PER_AXIS {
            for dy in 0..SUBCHUNKS_PER_AXIS {
                for dx in 0..SUBCHUNKS_PER_AXIS {
                    keys.push(StorageChunkKey::new(base.x + dx, base.y + dy, base.z + dz));
                }
            }
        }
        keys
    }

    fn span_for_storage_key(&self, key: StorageChunkKey) -> ChunkSpan {
        let chunk = ChunkCoord::new(
            key.x.div_euclid(SUBCHUNKS_PER_AXIS),
            key.y.div_euclid(SUBCHUNKS_PER_AXIS),
            key.z.div_euclid(SUBCHUNKS_PER_AXIS),
        );
        let offset = IVec3::new(
            key.x.rem_euclid(SUBCHUNKS_PER_AXIS) * SUBCHUNK_DIM,
            key.y.rem_euclid(SUBCHUNKS_PER_AXIS) * SUBCHUNK_DIM,
            key.z.rem_euclid(SUBCHUNKS_PER_AXIS) * SUBCHUNK_DIM,
        );
        ChunkSpan {
            chunk,
            offset,
            size: IVec3::splat(SUBCHUNK_DIM),
        }
    }

    fn chunks_for_region(&self, key: &RegionKey) -> Vec<ChunkCoord> {
        let base = IVec3::new(key.x, key.y, key.z) * REGION_CHUNK_SPAN;
        let mut out = Vec::with_capacity((REGION_CHUNK_SPAN * REGION_CHUNK_SPAN * REGION_CHUNK_SPAN) as usize);
        for dz in 0..REGION_CHUNK_SPAN {
            for dy in 0..REGION_CHUNK_SPAN {
                for dx in 0..REGION_CHUNK_SPAN {
                    out.push(ChunkCoord::new(base.x + dx, base.y + dy, base.z + dz));
                }
            }
        }
        out
    }

    fn region_chunk_span(&self) -> i32 {
        REGION_CHUNK_SPAN
    }
}

/// Local (x, z) column index of a storage key within its region's offset table.
pub fn region_column_index(region: &RegionKey, key: StorageChunkKey) -> usize {
    let local_x = key.x - region.x * REGION_SPAN;
    let local_z = key.z - region.z * REGION_SPAN;
    debug_assert!((0..REGION_SPAN).contains(&local_x) && (0..REGION_SPAN).contains(&local_z));
    (local_x * REGION_SPAN + local_z) as usize
}

#[cfg(test)]
mod test {
    use itertools::Itertools;

    use super::*;
    use crate::voxel::block::{BlockId, BlockState};

    #[test]
    fn storage_keys_stay_in_one_region() {
        let layout = SubchunkRegionLayout;
        for coord in [
            ChunkCoord::ZERO,
            ChunkCoord::new(7, 7, 7),
            ChunkCoord::new(8, 0, 0),
            ChunkCoord::new(-1, -1, -1),
            ChunkCoord::new(-8, 3, 15),
            ChunkCoord::new(-9, -17, 100),
        ] {
            let region = layout.region_for_chunk("strata:default", coord);
            let keys = layout.storage_keys_for_chunk(coord);
            assert_eq!(keys.len(), 8);
            for key in keys {
                let span = layout.span_for_storage_key(key);
                assert_eq!(span.chunk, coord);
                assert_eq!(span.size, IVec3::splat(SUBCHUNK_DIM));
                assert_eq!(
                    key.x.div_euclid(REGION_SPAN),
                    region.x,
                    "{key:?} escaped {region}"
                );
                assert_eq!(key.y.div_euclid(REGION_SPAN), region.y);
                assert_eq!(key.z.div_euclid(REGION_SPAN), region.z);
            }
        }
    }

    #[test]
    fn spans_tile_the_chunk() {
        let layout = SubchunkRegionLayout;
        let spans = layout
            .storage_keys_for_chunk(ChunkCoord::new(-3, 2, 5))
            .into_iter()
            .map(|k| layout.span_for_storage_key(k))
            .collect_vec();
        let mut covered = vec![false; crate::coordinates::CHUNK_DIM3Z];
        for span in spans {
            for z in 0..span.size.z {
                for y in 0..span.size.y {
                    for x in 0..span.size.x {
                        let pos =
                            InChunkPos::try_from_ivec3(span.offset + IVec3::new(x, y, z)).unwrap();
                        assert!(!covered[pos.as_index()], "overlapping span at {pos}");
                        covered[pos.as_index()] = true;
                    }
                }
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn chunks_for_region_contains_all_mapped_chunks() {
        let layout = SubchunkRegionLayout;
        let region = layout.region_for_chunk("strata:default", ChunkCoord::new(-5, 9, 2));
        let chunks = layout.chunks_for_region(&region);
        assert_eq!(chunks.len(), 512);
        for coord in &chunks {
            assert_eq!(layout.region_for_chunk("strata:default", *coord), region);
        }
    }

    #[test]
    fn span_extract_apply_round_trip() {
        let layout = SubchunkRegionLayout;
        let coord = ChunkCoord::new(1, -2, 3);
        let mut chunk = Chunk::new();
        chunk.put(InChunkPos::try_new(17, 2, 30).unwrap(), BlockState::new(BlockId(3)));
        chunk.put(InChunkPos::try_new(0, 0, 0).unwrap(), BlockState::new(BlockId(5)));

        let mut restored = Chunk::new();
        for key in layout.storage_keys_for_chunk(coord) {
            let span = layout.span_for_storage_key(key);
            let data = ChunkData::from_chunk(&chunk, span);
            assert_eq!(data.blocks.len(), span.volume());
            data.apply_to(&mut restored);
        }
        assert_eq!(restored.blocks()[..], chunk.blocks()[..]);
    }

    #[test]
    fn zone_id_normalization() {
        assert_eq!(normalize_zone_id("strata:default"), "strata/default");
        assert_eq!(normalize_zone_id("plain"), "plain");
    }
}
