//! Chunk meshes and the mesh builder interface.
//!
//! Mesh jobs receive a one-block-padded copy of the chunk's neighborhood so
//! boundary faces can be culled against neighbor blocks without touching the
//! chunk store from a worker thread.

use bytemuck::{Pod, Zeroable};
use strata_schemas::coordinates::{CHUNK_DIMZ, PADDED_DIM3Z, PADDED_DIMZ};
use strata_schemas::voxel::block::{BlockState, Direction, ALL_DIRECTIONS};
use strata_schemas::voxel::registry::BlockRegistry;

/// A dense padded block neighborhood, `PADDED_DIM³` in XYZ-linear order.
pub type PaddedBlocks = Box<[BlockState; PADDED_DIM3Z]>;

/// Allocates an all-air padded neighborhood.
pub fn empty_padded_blocks() -> PaddedBlocks {
    bytemuck::zeroed_box()
}

/// Index into a padded neighborhood. `(0, 0, 0)` is the corner one block
/// outside the chunk; local block `(x, y, z)` sits at `(x+1, y+1, z+1)`.
#[inline]
pub fn padded_index(x: usize, y: usize, z: usize) -> usize {
    x + y * PADDED_DIMZ + z * PADDED_DIMZ * PADDED_DIMZ
}

/// One mesh vertex. 16 bytes, ready for direct GPU upload.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct VoxelVertex {
    /// Position in chunk-local space.
    pub position: [f32; 3],
    /// Face direction index (`Direction as u8`), resolved to a normal in the shader.
    pub direction: u8,
    /// Packed light byte sampled from the face-adjacent block.
    pub light: u8,
    /// Block type ID for texture lookup.
    pub block: u16,
}

/// CPU-side mesh buffers for one chunk, handed to the renderer as-is.
#[derive(Clone, Debug, Default)]
pub struct ChunkMesh {
    /// Vertex buffer.
    pub vertices: Vec<VoxelVertex>,
    /// Index buffer, triangle list.
    pub indices: Vec<u32>,
}

impl ChunkMesh {
    /// True if the mesh has nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// A pure mesh producer: padded block neighborhood in, vertex/index buffers out.
pub trait MeshBuilder: Send + Sync {
    /// Builds the mesh for the chunk at the center of `padded`.
    fn build(&self, padded: &PaddedBlocks, registry: &BlockRegistry) -> ChunkMesh;
}

/// Corner offsets of each face quad, counter-clockwise seen from outside.
const FACE_CORNERS: [[[f32; 3]; 4]; 6] = [
    // +X
    [[1.0, 0.0, 1.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0]],
    // -X
    [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0]],
    // +Y
    [[0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
    // -Y
    [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
    // +Z
    [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]],
    // -Z
    [[1.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]],
];

/// Emits one quad per visible block face, culling faces hidden behind opaque
/// neighbors. The built-in mesher for tests and headless tools.
#[derive(Copy, Clone, Debug, Default)]
pub struct CulledMesher;

impl MeshBuilder for CulledMesher {
    fn build(&self, padded: &PaddedBlocks, registry: &BlockRegistry) -> ChunkMesh {
        let mut mesh = ChunkMesh::default();
        for z in 0..CHUNK_DIMZ {
            for y in 0..CHUNK_DIMZ {
                for x in 0..CHUNK_DIMZ {
                    let block = padded[padded_index(x + 1, y + 1, z + 1)];
                    if block.is_air() {
                        continue;
                    }
                    for direction in ALL_DIRECTIONS {
                        let offset = direction.offset();
                        let neighbor = padded[padded_index(
                            (x as i32 + 1 + offset.x) as usize,
                            (y as i32 + 1 + offset.y) as usize,
                            (z as i32 + 1 + offset.z) as usize,
                        )];
                        if registry.is_opaque(neighbor.id) {
                            continue;
                        }
                        emit_face(&mut mesh, x, y, z, direction, block, neighbor);
                    }
                }
            }
        }
        mesh
    }
}

fn emit_face(
    mesh: &mut ChunkMesh,
    x: usize,
    y: usize,
    z: usize,
    direction: Direction,
    block: BlockState,
    neighbor: BlockState,
) {
    let base = mesh.vertices.len() as u32;
    for corner in FACE_CORNERS[direction as usize] {
        mesh.vertices.push(VoxelVertex {
            position: [
                x as f32 + corner[0],
                y as f32 + corner[1],
                z as f32 + corner[2],
            ],
            direction: direction as u8,
            light: neighbor.light,
            block: block.id.0,
        });
    }
    mesh.indices
        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}

#[cfg(test)]
mod test {
    use strata_schemas::voxel::block::BlockId;
    use strata_schemas::voxel::registry::BlockType;

    use super::*;

    fn registry() -> BlockRegistry {
        let mut registry = BlockRegistry::new();
        registry.register(BlockType::solid("stone")).unwrap();
        registry
    }

    #[test]
    fn lone_block_emits_six_faces() {
        let registry = registry();
        let mut padded = empty_padded_blocks();
        padded[padded_index(5, 5, 5)] = BlockState::new(BlockId(1));
        let mesh = CulledMesher.build(&padded, &registry);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
    }

    #[test]
    fn touching_faces_are_culled() {
        let registry = registry();
        let mut padded = empty_padded_blocks();
        padded[padded_index(5, 5, 5)] = BlockState::new(BlockId(1));
        padded[padded_index(6, 5, 5)] = BlockState::new(BlockId(1));
        let mesh = CulledMesher.build(&padded, &registry);
        // Two cubes sharing a face: 10 visible faces.
        assert_eq!(mesh.indices.len(), 10 * 6);
    }

    #[test]
    fn neighbor_padding_culls_boundary_faces() {
        let registry = registry();
        let mut padded = empty_padded_blocks();
        // Block in the chunk's -X boundary layer, opaque padding beside it.
        padded[padded_index(1, 5, 5)] = BlockState::new(BlockId(1));
        padded[padded_index(0, 5, 5)] = BlockState::new(BlockId(1));
        let mesh = CulledMesher.build(&padded, &registry);
        assert_eq!(mesh.indices.len(), 5 * 6);
    }

    #[test]
    fn empty_neighborhood_is_empty_mesh() {
        let registry = registry();
        let mesh = CulledMesher.build(&empty_padded_blocks(), &registry);
        assert!(mesh.is_empty());
    }
}
