//! Region-based chunk persistence: on-disk paths, the binary region
//! container, world/zone metadata and the asynchronous chunk loader.

use kstring::KString;

use crate::prelude::*;
use crate::storage::StorageBackend;

pub mod chunk_codec;
pub mod entity_container;
pub mod loader;
pub mod metadata;
pub mod paths;
pub mod region_container;

/// Everything needed to address one world on one storage backend.
#[derive(Clone)]
pub struct PersistenceContext {
    /// The byte store holding the world.
    pub storage: Arc<dyn StorageBackend>,
    /// Root directory of the world within the storage backend.
    pub root_path: String,
    /// Zone override; when `None` the zone is resolved from `worldInfo.json`
    /// (falling back to the default zone).
    pub zone_id: Option<KString>,
}

impl PersistenceContext {
    /// Constructs a context with the zone resolved from world metadata.
    pub fn new(storage: Arc<dyn StorageBackend>, root_path: impl Into<String>) -> Self {
        Self {
            storage,
            root_path: root_path.into(),
            zone_id: None,
        }
    }

    /// Returns a copy of this context pinned to the given zone.
    pub fn with_zone(mut self, zone_id: impl Into<KString>) -> Self {
        self.zone_id = Some(zone_id.into());
        self
    }
}
