//! Representation of a resident chunk of voxel data and its streaming
//! bookkeeping flags.

use crate::coordinates::{InChunkPos, CHUNK_DIM3Z};
use crate::voxel::block::BlockState;
use crate::voxel::registry::BlockRegistry;

/// A dense XYZ-linear block array covering one chunk volume.
pub type ChunkBlocks = Box<[BlockState; CHUNK_DIM3Z]>;

/// Allocates an all-air block array.
pub fn empty_chunk_blocks() -> ChunkBlocks {
    bytemuck::zeroed_box()
}

/// A 32³ cube of voxels owned by the chunk store, plus the dirty/revision
/// bookkeeping the streaming and persistence layers rely on.
///
/// `mesh_revision` is monotonically non-decreasing across the chunk's whole
/// lifetime in the store; any mutation of mesh-relevant state bumps it so
/// that late mesh results carrying an older snapshot are discarded.
pub struct Chunk {
    blocks: ChunkBlocks,
    non_air: u32,
    world_gen_version: u32,
    persist_dirty: bool,
    mesh_dirty: bool,
    mesh_revision: u64,
    loaded_from_disk: bool,
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunk {
    /// Constructs an all-air chunk with clean flags.
    pub fn new() -> Self {
        Self {
            blocks: empty_chunk_blocks(),
            non_air: 0,
            world_gen_version: 0,
            persist_dirty: false,
            mesh_dirty: false,
            mesh_revision: 0,
            loaded_from_disk: false,
        }
    }

    /// Reads the block at the given in-chunk position.
    #[inline]
    pub fn get(&self, pos: InChunkPos) -> BlockState {
        self.blocks[pos.as_index()]
    }

    /// Writes the block at the given in-chunk position, returning the
    /// previous state. Does not touch any dirty flags; callers decide which
    /// bookkeeping the write implies.
    #[inline]
    pub fn put(&mut self, pos: InChunkPos, state: BlockState) -> BlockState {
        let slot = &mut self.blocks[pos.as_index()];
        let previous = *slot;
        *slot = state;
        match (previous.is_air(), state.is_air()) {
            (true, false) => self.non_air += 1,
            (false, true) => self.non_air -= 1,
            _ => {}
        }
        previous
    }

    /// Read-only access to the dense block array.
    #[inline]
    pub fn blocks(&self) -> &[BlockState; CHUNK_DIM3Z] {
        &self.blocks
    }

    /// Copies the block array for handing to a worker job.
    pub fn copy_blocks(&self) -> ChunkBlocks {
        let mut out = empty_chunk_blocks();
        out.copy_from_slice(&self.blocks[..]);
        out
    }

    /// Replaces the whole block array. Marks the mesh stale and bumps the
    /// mesh revision, since the visible content changed wholesale.
    pub fn copy_from(&mut self, blocks: &[BlockState; CHUNK_DIM3Z]) {
        self.blocks.copy_from_slice(&blocks[..]);
        self.non_air = blocks.iter().filter(|b| !b.is_air()).count() as u32;
        self.mark_mesh_dirty();
    }

    /// Replaces the whole block array, substituting any block ID unknown to
    /// the registry with the given placeholder. Returns how many voxels were
    /// substituted so the caller can log the mismatch once.
    pub fn copy_from_sanitized(
        &mut self,
        blocks: &[BlockState; CHUNK_DIM3Z],
        registry: &BlockRegistry,
        placeholder: BlockState,
    ) -> usize {
        let mut replaced = 0usize;
        let mut non_air = 0u32;
        for (dst, src) in self.blocks.iter_mut().zip(blocks.iter()) {
            let mut state = *src;
            if !registry.contains(state.id) {
                state = placeholder;
                replaced += 1;
            }
            if !state.is_air() {
                non_air += 1;
            }
            *dst = state;
        }
        self.non_air = non_air;
        self.mark_mesh_dirty();
        replaced
    }

    /// True if every block is air. Empty chunks skip mesh upload entirely.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.non_air == 0
    }

    /// The generator config version that produced this chunk's base content.
    #[inline]
    pub fn world_gen_version(&self) -> u32 {
        self.world_gen_version
    }

    /// Stamps the generator config version.
    pub fn set_world_gen_version(&mut self, version: u32) {
        self.world_gen_version = version;
    }

    /// True if the chunk has unsaved edits since the last region save.
    #[inline]
    pub fn is_persist_dirty(&self) -> bool {
        self.persist_dirty
    }

    /// Flags the chunk as carrying unsaved edits.
    pub fn mark_persist_dirty(&mut self) {
        self.persist_dirty = true;
    }

    /// Clears the unsaved-edits flag after a successful region save.
    pub fn clear_persist_dirty(&mut self) {
        self.persist_dirty = false;
    }

    /// True if the chunk's mesh is stale w.r.t. its blocks or a neighbor's
    /// boundary blocks.
    #[inline]
    pub fn is_mesh_dirty(&self) -> bool {
        self.mesh_dirty
    }

    /// Flags the mesh as stale and advances the revision counter.
    pub fn mark_mesh_dirty(&mut self) {
        self.mesh_dirty = true;
        self.mesh_revision += 1;
    }

    /// Clears the mesh-stale flag. The revision is left untouched so results
    /// snapshotted before the clear still compare correctly.
    pub fn clear_mesh_dirty(&mut self) {
        self.mesh_dirty = false;
    }

    /// The current mesh revision token.
    #[inline]
    pub fn mesh_revision(&self) -> u64 {
        self.mesh_revision
    }

    /// True if this chunk's blocks originated from persistence.
    #[inline]
    pub fn loaded_from_disk(&self) -> bool {
        self.loaded_from_disk
    }

    /// Marks whether the blocks originated from persistence; loaded chunks
    /// may mesh without all six neighbors resident.
    pub fn set_loaded_from_disk(&mut self, loaded: bool) {
        self.loaded_from_disk = loaded;
    }
}
