//! The world generator interface consumed by the streaming core.

use smart_default::SmartDefault;
use strata_schemas::coordinates::{ChunkCoord, InChunkPos, CHUNK_DIM, CHUNK_DIM3Z};
use strata_schemas::voxel::block::BlockState;

use crate::prelude::*;

/// Generator configuration shared by every generation job.
///
/// `version` stamps generated chunks; resident chunks with a stale version
/// are discarded and regenerated when the streamer walks them.
#[derive(Copy, Clone, Eq, PartialEq, Debug, SmartDefault)]
pub struct WorldGenConfig {
    /// Generator config version.
    #[default = 1]
    pub version: u32,
    /// World seed.
    pub seed: u64,
}

/// A pure chunk content producer: deterministic given the coordinate and the
/// generator's configured seed.
///
/// Implementations are shared by concurrently running worker jobs, so they
/// must not mutate internal state while jobs may be in flight; reconfiguring
/// means swapping the shared handle and bumping the config version.
pub trait WorldGenerator: Send + Sync {
    /// The active generator configuration.
    fn config(&self) -> &WorldGenConfig;

    /// Fills `out` with the chunk's blocks. Workers poll `cancel` at coarse
    /// granularity and may leave `out` partially written once it is set.
    fn generate(&self, coord: ChunkCoord, out: &mut [BlockState; CHUNK_DIM3Z], cancel: &AtomicBool);
}

/// Generates an infinite flat plane: solid below the configured ground
/// height, air above. The built-in generator for tests and headless tools.
pub struct FlatWorldGenerator {
    config: WorldGenConfig,
    ground_height: i32,
    block: BlockState,
}

impl FlatWorldGenerator {
    /// Constructs a flat generator producing `block` below `ground_height`.
    pub fn new(config: WorldGenConfig, ground_height: i32, block: BlockState) -> Self {
        Self {
            config,
            ground_height,
            block,
        }
    }
}

impl WorldGenerator for FlatWorldGenerator {
    fn config(&self) -> &WorldGenConfig {
        &self.config
    }

    fn generate(&self, coord: ChunkCoord, out: &mut [BlockState; CHUNK_DIM3Z], cancel: &AtomicBool) {
        let base_y = coord.y * CHUNK_DIM;
        for y in 0..CHUNK_DIM {
            if cancel.load(AtomicOrdering::Relaxed) {
                return;
            }
            let state = if base_y + y < self.ground_height {
                self.block
            } else {
                BlockState::AIR
            };
            if state.is_air() {
                continue;
            }
            for z in 0..CHUNK_DIM {
                for x in 0..CHUNK_DIM {
                    out[InChunkPos::try_new(x, y, z).expect("in bounds").as_index()] = state;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use strata_schemas::voxel::block::BlockId;
    use strata_schemas::voxel::chunk::empty_chunk_blocks;

    use super::*;

    fn solid() -> BlockState {
        BlockState::new(BlockId(1))
    }

    #[test]
    fn plane_splits_at_ground_height() {
        let generator = FlatWorldGenerator::new(WorldGenConfig::default(), 4, solid());
        let mut blocks = empty_chunk_blocks();
        let cancel = AtomicBool::new(false);
        generator.generate(ChunkCoord::ZERO, &mut blocks, &cancel);

        assert_eq!(blocks[InChunkPos::try_new(0, 3, 0).unwrap().as_index()], solid());
        assert!(blocks[InChunkPos::try_new(0, 4, 0).unwrap().as_index()].is_air());

        let mut above = empty_chunk_blocks();
        generator.generate(ChunkCoord::new(0, 1, 0), &mut above, &cancel);
        assert!(above.iter().all(|b| b.is_air()));

        let mut below = empty_chunk_blocks();
        generator.generate(ChunkCoord::new(0, -1, 0), &mut below, &cancel);
        assert!(below.iter().all(|b| *b == solid()));
    }

    #[test]
    fn cancellation_stops_generation() {
        let generator = FlatWorldGenerator::new(WorldGenConfig::default(), 1000, solid());
        let mut blocks = empty_chunk_blocks();
        let cancel = AtomicBool::new(true);
        generator.generate(ChunkCoord::ZERO, &mut blocks, &cancel);
        assert!(blocks.iter().all(|b| b.is_air()));
    }
}
