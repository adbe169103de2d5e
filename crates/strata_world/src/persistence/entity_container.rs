//! Entity region persistence. The payload bytes are opaque to the streaming
//! core; entity simulation owns their meaning.

use strata_schemas::region::RegionKey;

use crate::error::PersistenceResult;
use crate::persistence::paths;
use crate::prelude::*;
use crate::storage::{AtomicWriteOptions, StorageBackend};

/// One entity region file's key and raw payload.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct EntityRegionSnapshot {
    /// The region's key.
    pub key: RegionKey,
    /// Opaque payload owned by the entity layer.
    pub payload: Vec<u8>,
}

/// Stores opaque entity region payloads alongside the chunk regions.
pub struct EntityRegionContainer {
    storage: Arc<dyn StorageBackend>,
    root_path: String,
}

impl EntityRegionContainer {
    /// Constructs a container over the given storage.
    pub fn new(storage: Arc<dyn StorageBackend>, root_path: impl Into<String>) -> Self {
        Self {
            storage,
            root_path: root_path.into(),
        }
    }

    /// Writes an entity region atomically; an empty payload removes the file.
    pub fn save_region(&self, region: &EntityRegionSnapshot) -> PersistenceResult<()> {
        let path = paths::entity_region_path(&self.root_path, &region.key);
        if region.payload.is_empty() {
            self.storage.remove(&path)?;
            return Ok(());
        }
        let mut session = self.storage.open_write(&path, AtomicWriteOptions::default())?;
        std::io::Write::write_all(&mut session, &region.payload)?;
        session.commit()?;
        Ok(())
    }

    /// Loads an entity region; a missing file yields an empty payload.
    pub fn load_region(&self, key: &RegionKey) -> PersistenceResult<EntityRegionSnapshot> {
        let path = paths::entity_region_path(&self.root_path, key);
        if !self.storage.exists(&path)? {
            return Ok(EntityRegionSnapshot {
                key: key.clone(),
                payload: Vec::new(),
            });
        }
        Ok(EntityRegionSnapshot {
            key: key.clone(),
            payload: self.storage.read_all(&path)?,
        })
    }

    /// Enumerates the persisted entity regions of a zone.
    pub fn list_regions(&self, zone_id: &str) -> PersistenceResult<Vec<RegionKey>> {
        let dir = paths::entity_region_dir(&self.root_path, zone_id);
        let mut out = Vec::new();
        for name in self.storage.list(&dir)? {
            let Some(stem) = name.strip_prefix("entityRegion_").and_then(|n| n.strip_suffix(".bin")) else {
                continue;
            };
            let coords: Vec<i32> = stem.split('_').filter_map(|p| p.parse().ok()).collect();
            if let [x, y, z] = coords[..] {
                out.push(RegionKey::new(kstring::KString::from_ref(zone_id), x, y, z));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::MemoryBackend;

    #[test]
    fn opaque_payload_round_trip() {
        let backend = MemoryBackend::new();
        let container = EntityRegionContainer::new(Arc::new(backend.clone()), "world");
        let key = RegionKey::new("strata:default", 1, 0, -1);

        container
            .save_region(&EntityRegionSnapshot {
                key: key.clone(),
                payload: vec![1, 2, 3, 4],
            })
            .unwrap();
        assert_eq!(container.load_region(&key).unwrap().payload, [1, 2, 3, 4]);
        assert_eq!(container.list_regions("strata:default").unwrap(), [key.clone()]);

        container
            .save_region(&EntityRegionSnapshot {
                key: key.clone(),
                payload: Vec::new(),
            })
            .unwrap();
        assert!(container.load_region(&key).unwrap().payload.is_empty());
        assert_eq!(backend.file_count(), 0);
    }
}
