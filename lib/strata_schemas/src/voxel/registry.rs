//! A stable mapping between namespaced block identifiers, numerical IDs and
//! block type descriptors, established once at startup.

use hashbrown::HashMap;
use kstring::KString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::voxel::block::BlockId;
use crate::STRATA_DOMAIN_CONST;

/// Checks if the given name is a valid namespaced block identifier
/// (`[a-z0-9_]+:[a-z0-9_]+`).
pub const fn is_valid_block_identifier(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    // const-fn safe for loop
    let mut i = 0;
    let mut colon_at = usize::MAX;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => {}
            b'a'..=b'z' => {}
            b'_' => {}
            b':' => {
                if colon_at != usize::MAX {
                    return false;
                }
                colon_at = i;
            }
            _ => return false,
        }
        i += 1;
    }
    colon_at != usize::MAX && colon_at != 0 && colon_at != bytes.len() - 1
}

/// A definition of a block type: identifier plus the per-type flags the
/// mesher and collision code care about.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockType {
    /// The unique namespaced identifier, e.g. `strata:stone`
    pub identifier: KString,
    /// Whether faces adjacent to this block are hidden
    pub is_opaque: bool,
    /// Whether this block has a collision box
    pub is_solid: bool,
}

impl BlockType {
    /// Constructs an opaque, solid block type in the `strata:` namespace.
    pub fn solid(key: &str) -> Self {
        Self {
            identifier: KString::from_string(format!("{STRATA_DOMAIN_CONST}:{key}")),
            is_opaque: true,
            is_solid: true,
        }
    }
}

/// Errors raised during block type registration.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RegistryError {
    /// Identifier does not match `[a-z0-9_]+:[a-z0-9_]+`.
    #[error("Invalid block identifier `{0}`")]
    InvalidIdentifier(KString),
    /// Identifier already registered under a different ID.
    #[error("Block identifier `{0}` is already registered")]
    DuplicateIdentifier(KString),
    /// All 65535 non-air IDs are in use.
    #[error("Block registry ID space exhausted")]
    IdSpaceExhausted,
}

/// Process-wide identifier to numeric block ID mapping with per-type
/// opacity/solidity metadata. ID 0 is always the air type.
pub struct BlockRegistry {
    types: Vec<BlockType>,
    by_identifier: HashMap<KString, BlockId>,
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry {
    /// Constructs a registry holding only the air type.
    pub fn new() -> Self {
        let air = BlockType {
            identifier: KString::from_static("strata:air"),
            is_opaque: false,
            is_solid: false,
        };
        let mut by_identifier = HashMap::new();
        by_identifier.insert(air.identifier.clone(), BlockId::AIR);
        Self {
            types: vec![air],
            by_identifier,
        }
    }

    /// The reserved air ID.
    #[inline]
    pub const fn air_id() -> BlockId {
        BlockId::AIR
    }

    /// Registers a new block type, returning its assigned ID.
    pub fn register(&mut self, block_type: BlockType) -> Result<BlockId, RegistryError> {
        if !is_valid_block_identifier(&block_type.identifier) {
            return Err(RegistryError::InvalidIdentifier(block_type.identifier.clone()));
        }
        if self.by_identifier.contains_key(&block_type.identifier) {
            return Err(RegistryError::DuplicateIdentifier(block_type.identifier.clone()));
        }
        let raw: u16 = self
            .types
            .len()
            .try_into()
            .map_err(|_| RegistryError::IdSpaceExhausted)?;
        let id = BlockId(raw);
        self.by_identifier.insert(block_type.identifier.clone(), id);
        self.types.push(block_type);
        Ok(id)
    }

    /// Looks up a block ID by its namespaced identifier.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<BlockId> {
        self.by_identifier.get(identifier).copied()
    }

    /// Returns the type descriptor for a registered ID.
    #[inline]
    pub fn get_type(&self, id: BlockId) -> Option<&BlockType> {
        self.types.get(id.0 as usize)
    }

    /// Checks whether the given ID is registered.
    #[inline]
    pub fn contains(&self, id: BlockId) -> bool {
        (id.0 as usize) < self.types.len()
    }

    /// Whether the given ID renders as a full opaque cube. Unknown IDs are
    /// treated as transparent.
    #[inline]
    pub fn is_opaque(&self, id: BlockId) -> bool {
        self.get_type(id).is_some_and(|t| t.is_opaque)
    }

    /// Number of registered types, including air.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Always false: air is registered on construction.
    pub fn is_empty(&self) -> bool {
        false
    }
}
