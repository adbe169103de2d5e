//! Strongly typed newtype wrappers for the coordinate spaces of the voxel
//! world, and the related compile-time constants.

use std::fmt::{Display, Formatter};
use std::ops::Deref;

use bevy_math::IVec3;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a side of a chunk in blocks
pub const CHUNK_DIM: i32 = 32;
/// Length of a side of a chunk in blocks, as a `usize`
pub const CHUNK_DIMZ: usize = CHUNK_DIM as usize;
/// Number of blocks on the face of a chunk
pub const CHUNK_DIM2: i32 = CHUNK_DIM * CHUNK_DIM;
/// Number of blocks on the face of a chunk, as a `usize`
pub const CHUNK_DIM2Z: usize = CHUNK_DIM2 as usize;
/// Number of blocks in the volume of a chunk
pub const CHUNK_DIM3: i32 = CHUNK_DIM * CHUNK_DIM * CHUNK_DIM;
/// Number of blocks in the volume of a chunk, as a `usize`
pub const CHUNK_DIM3Z: usize = CHUNK_DIM3 as usize;

/// Side length of the one-block-padded neighborhood copied for mesh jobs
pub const PADDED_DIM: i32 = CHUNK_DIM + 2;
/// [`PADDED_DIM`] as a `usize`
pub const PADDED_DIMZ: usize = PADDED_DIM as usize;
/// Number of blocks in a padded mesh neighborhood
pub const PADDED_DIM3Z: usize = PADDED_DIMZ * PADDED_DIMZ * PADDED_DIMZ;

/// Error when the given coordinates are outside of the chunk boundary.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("Given coordinates were outside of chunk boundaries: {0}")]
pub struct InChunkVecError(IVec3);

/// Error when the given block index is outside of the chunk volume.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("Given index was outside of chunk boundaries: {0}")]
pub struct InChunkIndexError(usize);

/// An absolute chunk position in the voxel world
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Pod, Zeroable, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ChunkCoord(pub(crate) IVec3);

/// An absolute block position in the voxel world
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Pod, Zeroable, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockPos(pub(crate) IVec3);

/// A block position inside of a chunk, limited to `0..CHUNK_DIM` on every axis
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Pod, Zeroable, Serialize, Deserialize)]
#[repr(transparent)]
pub struct InChunkPos(pub(crate) IVec3);

macro_rules! impl_simple_ivec3_newtype {
    ($T:ident) => {
        impl $T {
            /// (0, 0, 0)
            pub const ZERO: Self = Self(IVec3::ZERO);
            /// (1, 1, 1)
            pub const ONE: Self = Self(IVec3::ONE);

            /// Const-friendly `from<IVec3>`
            #[inline]
            pub const fn from_ivec3(value: IVec3) -> Self {
                Self(value)
            }

            /// Const-friendly `into<IVec3>`
            #[inline]
            pub const fn into_ivec3(self) -> IVec3 {
                self.0
            }

            /// Constructs a new [`Self`] from the given coordinates.
            #[inline]
            pub const fn new(x: i32, y: i32, z: i32) -> Self {
                Self(IVec3::new(x, y, z))
            }

            /// Constructs a new [`Self`] from a given coordinate copied to all dimensions.
            #[inline]
            pub const fn splat(v: i32) -> Self {
                Self(IVec3::splat(v))
            }
        }

        impl From<IVec3> for $T {
            #[inline]
            fn from(value: IVec3) -> Self {
                Self::from_ivec3(value)
            }
        }
        impl From<$T> for IVec3 {
            #[inline]
            fn from(value: $T) -> IVec3 {
                value.into_ivec3()
            }
        }
        impl Deref for $T {
            type Target = IVec3;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

// === ChunkCoord
impl_simple_ivec3_newtype!(ChunkCoord);

impl ChunkCoord {
    /// Returns the chunk coordinate displaced by the given per-axis offsets.
    #[inline]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self(IVec3::new(self.0.x + dx, self.0.y + dy, self.0.z + dz))
    }

    /// Squared chunk-grid distance to another chunk coordinate.
    #[inline]
    pub fn distance_squared(self, other: Self) -> i32 {
        let d = self.0 - other.0;
        d.x * d.x + d.y * d.y + d.z * d.z
    }

    /// The block position of this chunk's minimum corner.
    #[inline]
    pub fn base_block_pos(self) -> BlockPos {
        BlockPos(self.0 * IVec3::splat(CHUNK_DIM))
    }
}

impl From<BlockPos> for ChunkCoord {
    fn from(value: BlockPos) -> Self {
        Self::new(
            value.x.div_euclid(CHUNK_DIM),
            value.y.div_euclid(CHUNK_DIM),
            value.z.div_euclid(CHUNK_DIM),
        )
    }
}

impl Display for ChunkCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Chunk(x={}, y={}, z={})", self.x, self.y, self.z)
    }
}

// === BlockPos
impl_simple_ivec3_newtype!(BlockPos);

impl BlockPos {
    /// Splits the block position into the coordinate of the containing chunk
    /// and the coordinate of the block within that chunk.
    pub fn split_chunk_component(self) -> (ChunkCoord, InChunkPos) {
        (
            ChunkCoord::new(
                self.x.div_euclid(CHUNK_DIM),
                self.y.div_euclid(CHUNK_DIM),
                self.z.div_euclid(CHUNK_DIM),
            ),
            InChunkPos(IVec3::new(
                self.x.rem_euclid(CHUNK_DIM),
                self.y.rem_euclid(CHUNK_DIM),
                self.z.rem_euclid(CHUNK_DIM),
            )),
        )
    }
}

impl From<ChunkCoord> for BlockPos {
    fn from(value: ChunkCoord) -> Self {
        value.base_block_pos()
    }
}

impl Display for BlockPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Block(x={}, y={}, z={})", self.x, self.y, self.z)
    }
}

// === InChunkPos

impl TryFrom<IVec3> for InChunkPos {
    type Error = InChunkVecError;

    #[inline]
    fn try_from(value: IVec3) -> Result<Self, Self::Error> {
        Self::try_from_ivec3(value)
    }
}

impl From<InChunkPos> for IVec3 {
    #[inline]
    fn from(value: InChunkPos) -> IVec3 {
        value.0
    }
}

impl Deref for InChunkPos {
    type Target = IVec3;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl InChunkPos {
    /// (0, 0, 0)
    pub const ZERO: Self = Self(IVec3::ZERO);
    /// (31, 31, 31)
    pub const MAX: Self = Self(IVec3::splat(CHUNK_DIM - 1));

    /// Const-friendly `try_from<IVec3>`
    #[inline]
    pub const fn try_from_ivec3(v: IVec3) -> Result<Self, InChunkVecError> {
        let IVec3 { x, y, z } = v;
        if (x < 0) || (x >= CHUNK_DIM) || (y < 0) || (y >= CHUNK_DIM) || (z < 0) || (z >= CHUNK_DIM) {
            Err(InChunkVecError(v))
        } else {
            Ok(Self(v))
        }
    }

    /// Constructs a new in-chunk position from the given coordinates, or
    /// returns an error if it's outside of chunk bounds.
    #[inline]
    pub const fn try_new(x: i32, y: i32, z: i32) -> Result<Self, InChunkVecError> {
        Self::try_from_ivec3(IVec3::new(x, y, z))
    }

    /// Convert an XYZ-strided index into the chunk storage array into coordinates
    #[inline]
    pub const fn try_from_index(idx: usize) -> Result<Self, InChunkIndexError> {
        if idx >= CHUNK_DIM3Z {
            return Err(InChunkIndexError(idx));
        }
        let i: i32 = idx as i32;
        Ok(InChunkPos(IVec3::new(
            i % CHUNK_DIM,
            (i / CHUNK_DIM) % CHUNK_DIM,
            (i / CHUNK_DIM2) % CHUNK_DIM,
        )))
    }

    /// Converts the coordinates into an XYZ-strided index into the chunk storage array
    #[inline]
    pub const fn as_index(self) -> usize {
        (self.0.x + (CHUNK_DIM * self.0.y) + (CHUNK_DIM2 * self.0.z)) as usize
    }
}

impl Display for InChunkPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "InChunk(x={}, y={}, z={})", self.x, self.y, self.z)
    }
}
