//! Core block state types: compact per-voxel data and face directions.

use bevy_math::IVec3;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Identifies a registered block type. ID 0 is reserved for air.
#[derive(
    Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct BlockId(pub u16);

impl BlockId {
    /// The reserved air (empty space) block ID.
    pub const AIR: Self = Self(0);

    /// Checks if this ID is the reserved air ID.
    #[inline]
    pub const fn is_air(self) -> bool {
        self.0 == 0
    }
}

/// Per-voxel instance state: type ID, metadata byte and packed light byte.
/// Four bytes total, stored densely in chunk block arrays.
#[derive(
    Copy, Clone, Default, Eq, PartialEq, Hash, Debug, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(C)]
pub struct BlockState {
    /// Block type ID, 0 = air
    pub id: BlockId,
    /// Rotation, variant or connection state
    pub metadata: u8,
    /// Packed light: upper nibble sky light, lower nibble block light
    pub light: u8,
}

impl BlockState {
    /// The all-zero air state.
    pub const AIR: Self = Self {
        id: BlockId::AIR,
        metadata: 0,
        light: 0,
    };

    /// Constructs a state for the given type with zeroed metadata and light.
    #[inline]
    pub const fn new(id: BlockId) -> Self {
        Self {
            id,
            metadata: 0,
            light: 0,
        }
    }

    /// Checks if this state is air.
    #[inline]
    pub const fn is_air(self) -> bool {
        self.id.is_air()
    }

    /// Sky light level (0-15).
    #[inline]
    pub const fn sky_light(self) -> u8 {
        (self.light >> 4) & 0x0F
    }

    /// Block light level (0-15).
    #[inline]
    pub const fn block_light(self) -> u8 {
        self.light & 0x0F
    }

    /// Sets the sky light level (0-15).
    pub fn set_sky_light(&mut self, level: u8) {
        self.light = (self.light & 0x0F) | ((level & 0x0F) << 4);
    }

    /// Sets the block light level (0-15).
    pub fn set_block_light(&mut self, level: u8) {
        self.light = (self.light & 0xF0) | (level & 0x0F);
    }
}

/// Axis-aligned face directions, used for neighbor access and face culling.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// East (+X)
    PosX = 0,
    /// West (-X)
    NegX = 1,
    /// Up (+Y)
    PosY = 2,
    /// Down (-Y)
    NegY = 3,
    /// South (+Z)
    PosZ = 4,
    /// North (-Z)
    NegZ = 5,
}

/// Number of face directions.
pub const DIRECTION_COUNT: usize = 6;

/// All six face directions, indexable by `Direction as usize`.
pub const ALL_DIRECTIONS: [Direction; DIRECTION_COUNT] = [
    Direction::PosX,
    Direction::NegX,
    Direction::PosY,
    Direction::NegY,
    Direction::PosZ,
    Direction::NegZ,
];

impl Direction {
    /// The unit offset of this direction.
    #[inline]
    pub const fn offset(self) -> IVec3 {
        match self {
            Direction::PosX => IVec3::new(1, 0, 0),
            Direction::NegX => IVec3::new(-1, 0, 0),
            Direction::PosY => IVec3::new(0, 1, 0),
            Direction::NegY => IVec3::new(0, -1, 0),
            Direction::PosZ => IVec3::new(0, 0, 1),
            Direction::NegZ => IVec3::new(0, 0, -1),
        }
    }

    /// The opposite direction.
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Direction::PosX => Direction::NegX,
            Direction::NegX => Direction::PosX,
            Direction::PosY => Direction::NegY,
            Direction::NegY => Direction::PosY,
            Direction::PosZ => Direction::NegZ,
            Direction::NegZ => Direction::PosZ,
        }
    }
}
