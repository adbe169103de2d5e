//! The resident chunk cache: exclusive main-thread ownership of every loaded
//! chunk, keyed by chunk coordinate.

use strata_schemas::coordinates::{BlockPos, ChunkCoord};
use strata_schemas::voxel::block::{BlockState, ALL_DIRECTIONS};
use strata_schemas::voxel::chunk::Chunk;

use crate::prelude::*;

/// Owns every resident [`Chunk`], exactly one per coordinate. Workers only
/// ever see copies of the block arrays; all mutation happens here, on the
/// main thread.
#[derive(Default)]
pub struct ChunkStore {
    chunks: HashMap<ChunkCoord, Chunk>,
}

impl ChunkStore {
    /// Constructs an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the chunk at `coord`, inserting an empty one if absent.
    pub fn get_or_create(&mut self, coord: ChunkCoord) -> &mut Chunk {
        self.chunks.entry(coord).or_default()
    }

    /// Returns the chunk at `coord` if resident.
    #[inline]
    pub fn get(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }

    /// Returns the chunk at `coord` mutably if resident.
    #[inline]
    pub fn get_mut(&mut self, coord: ChunkCoord) -> Option<&mut Chunk> {
        self.chunks.get_mut(&coord)
    }

    /// Drops the chunk at `coord`; false if it was not resident.
    pub fn remove(&mut self, coord: ChunkCoord) -> bool {
        self.chunks.remove(&coord).is_some()
    }

    /// Number of resident chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True if no chunks are resident.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drops every resident chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Visits every resident chunk.
    pub fn for_each(&self, mut f: impl FnMut(ChunkCoord, &Chunk)) {
        for (&coord, chunk) in &self.chunks {
            f(coord, chunk);
        }
    }

    /// Writes a block at world coordinates, creating the containing chunk if
    /// needed. Marks the chunk edited and mesh-stale, and synchronously marks
    /// each face-adjacent neighbor mesh-stale when the edit lies on the
    /// shared boundary, so no mesh built after this call can use the
    /// pre-edit value.
    pub fn set_block(&mut self, pos: BlockPos, state: BlockState) {
        let (coord, local) = pos.split_chunk_component();
        let chunk = self.get_or_create(coord);
        chunk.put(local, state);
        chunk.mark_persist_dirty();
        chunk.mark_mesh_dirty();

        for direction in ALL_DIRECTIONS {
            let offset = direction.offset();
            let boundary = (offset.x == -1 && local.x == 0)
                || (offset.x == 1 && local.x == strata_schemas::coordinates::CHUNK_DIM - 1)
                || (offset.y == -1 && local.y == 0)
                || (offset.y == 1 && local.y == strata_schemas::coordinates::CHUNK_DIM - 1)
                || (offset.z == -1 && local.z == 0)
                || (offset.z == 1 && local.z == strata_schemas::coordinates::CHUNK_DIM - 1);
            if !boundary {
                continue;
            }
            if let Some(neighbor) = self.get_mut(coord.offset(offset.x, offset.y, offset.z)) {
                neighbor.mark_mesh_dirty();
            }
        }
    }

    /// Reads the block at world coordinates; air if the containing chunk is
    /// absent. Never allocates.
    pub fn get_block(&self, pos: BlockPos) -> BlockState {
        let (coord, local) = pos.split_chunk_component();
        match self.get(coord) {
            Some(chunk) => chunk.get(local),
            None => BlockState::AIR,
        }
    }
}
