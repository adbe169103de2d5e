//! Concurrent mesh storage: many readers (rendering, overlays), one writer
//! (the main thread installing freshly built meshes).

use strata_schemas::coordinates::ChunkCoord;

use crate::prelude::*;
use crate::voxel::mesher::ChunkMesh;

/// Identity of a stored mesh, unique across every store in the process.
/// Higher layers use it to tag rendering state with a mesh's origin.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct MeshId {
    /// The owning store's process-unique ID.
    pub store_id: u32,
    /// The chunk the mesh belongs to.
    pub coord: ChunkCoord,
}

/// One stored mesh with its identity and install revision.
pub struct MeshEntry {
    /// The chunk the mesh belongs to.
    pub coord: ChunkCoord,
    /// The mesh buffers.
    pub mesh: ChunkMesh,
    /// Stable identity of this entry.
    pub id: MeshId,
    /// Incremented on every install for this coordinate.
    pub revision: u32,
}

#[derive(Default)]
struct MeshStoreInner {
    meshes: HashMap<ChunkCoord, MeshEntry>,
    revision_counters: HashMap<ChunkCoord, u32>,
}

static NEXT_STORE_ID: AtomicU32 = AtomicU32::new(1);

/// Maps chunk coordinates to GPU-ready meshes behind a read/write lock.
///
/// Writes (`set`, `remove`, `clear`) are legal from the main thread only and
/// hold the exclusive lock briefly; readers snapshot entries under the
/// shared lock and must tolerate entries disappearing between frames.
pub struct MeshStore {
    store_id: u32,
    version: AtomicU64,
    inner: RwLock<MeshStoreInner>,
}

impl Default for MeshStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshStore {
    /// Constructs an empty store with a fresh process-unique ID.
    pub fn new() -> Self {
        Self {
            store_id: NEXT_STORE_ID.fetch_add(1, AtomicOrdering::Relaxed),
            version: AtomicU64::new(0),
            inner: RwLock::new(MeshStoreInner::default()),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MeshStoreInner> {
        self.inner.write().expect("mesh store poisoned")
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MeshStoreInner> {
        self.inner.read().expect("mesh store poisoned")
    }

    /// Installs a mesh for `coord`, replacing any previous one and bumping
    /// both the per-coordinate revision and the store version.
    pub fn set(&self, coord: ChunkCoord, mesh: ChunkMesh) {
        let mut inner = self.write();
        let counter = inner.revision_counters.entry(coord).or_insert(0);
        let next = counter.wrapping_add(1);
        *counter = if next == 0 { 1 } else { next };
        let revision = *counter;
        let id = MeshId {
            store_id: self.store_id,
            coord,
        };
        inner.meshes.insert(
            coord,
            MeshEntry {
                coord,
                mesh,
                id,
                revision,
            },
        );
        self.version.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Removes the mesh for `coord` if present.
    pub fn remove(&self, coord: ChunkCoord) {
        let mut inner = self.write();
        let removed = inner.meshes.remove(&coord).is_some();
        inner.revision_counters.remove(&coord);
        if removed {
            self.version.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Removes every mesh.
    pub fn clear(&self) {
        let mut inner = self.write();
        if !inner.meshes.is_empty() {
            inner.meshes.clear();
            inner.revision_counters.clear();
            self.version.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Whether a mesh is stored for `coord`.
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.read().meshes.contains_key(&coord)
    }

    /// Number of stored meshes.
    pub fn len(&self) -> usize {
        self.read().meshes.len()
    }

    /// True if no meshes are stored.
    pub fn is_empty(&self) -> bool {
        self.read().meshes.is_empty()
    }

    /// Visits every stored entry under the shared lock.
    pub fn for_each(&self, mut f: impl FnMut(&MeshEntry)) {
        let inner = self.read();
        for entry in inner.meshes.values() {
            f(entry);
        }
    }

    /// Monotonic counter bumped on every mutation; cheap change detection
    /// for render-side caches.
    pub fn version(&self) -> u64 {
        self.version.load(AtomicOrdering::Relaxed)
    }

    /// This store's process-unique ID.
    pub fn store_id(&self) -> u32 {
        self.store_id
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_bumps_versions_and_revisions() {
        let store = MeshStore::new();
        let coord = ChunkCoord::new(1, 2, 3);
        assert_eq!(store.version(), 0);

        store.set(coord, ChunkMesh::default());
        assert!(store.contains(coord));
        assert_eq!(store.version(), 1);

        store.set(coord, ChunkMesh::default());
        assert_eq!(store.version(), 2);
        store.for_each(|entry| {
            assert_eq!(entry.revision, 2);
            assert_eq!(entry.id.coord, coord);
        });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let store = MeshStore::new();
        store.set(ChunkCoord::ZERO, ChunkMesh::default());
        store.set(ChunkCoord::new(1, 0, 0), ChunkMesh::default());

        store.remove(ChunkCoord::ZERO);
        assert!(!store.contains(ChunkCoord::ZERO));
        assert_eq!(store.len(), 1);
        let version = store.version();
        store.remove(ChunkCoord::ZERO);
        assert_eq!(store.version(), version, "removing a missing mesh is silent");

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn store_ids_are_unique() {
        let a = MeshStore::new();
        let b = MeshStore::new();
        assert_ne!(a.store_id(), b.store_id());
    }
}
