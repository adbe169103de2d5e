//! The binary chunk region container.
//!
//! One region file holds every persisted span of an 8³-chunk cube, grouped
//! into (x, z) columns behind a compact offset table:
//!
//! ```text
//! header:  magic(4) version(4) compressionType(4) columnCount(4)
//! lz4:     compressedSize(4) decompressedSize(4) compressed-payload
//! payload: offsetTypeByte(1) offsetTable[REGION_SPAN^2] columns
//! column:  columnByteSize(4) formatVersion(4) numChunks(1) entries...
//! entry:   entryLen(4) keyX(4) keyY(4) keyZ(4) chunk-codec-blob
//! ```
//!
//! Offsets are relative to the start of the columns area; missing columns
//! store -1. The offset-type byte selects an `i8`/`i16`/`i32` table encoding
//! (the writer emits `i16` or `i32`; `i8` is still accepted on read). All
//! integers are big-endian. Writes go through an atomic storage session, and
//! an empty snapshot removes the file instead of writing one.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use strata_schemas::region::{
    region_column_index, ChunkRegionSnapshot, ChunkSnapshot, RegionKey, RegionLayout, StorageChunkKey,
    REGION_COLUMN_COUNT, REGION_SPAN,
};
use tracing::warn;

use crate::error::{PersistenceError, PersistenceResult};
use crate::persistence::chunk_codec::{decode_chunk_data, encode_chunk_data};
use crate::persistence::paths;
use crate::prelude::*;
use crate::storage::{AtomicWriteOptions, StorageBackend};

/// File magic, `STRG` in ASCII.
pub const REGION_MAGIC: u32 = 0x5354_5247;
/// Current region file format version.
pub const REGION_FORMAT_VERSION: u32 = 1;

const COMPRESSION_NONE: u32 = 0;
const COMPRESSION_LZ4: u32 = 1;

const OFFSET_TYPE_I8: u8 = 1;
const OFFSET_TYPE_I16: u8 = 2;
const OFFSET_TYPE_I32: u8 = 3;

/// Entry header: length (4) is followed by the three key coordinates (12).
const ENTRY_KEY_BYTES: u32 = 12;

/// Reads and writes chunk region files for one world root.
pub struct ChunkRegionContainer {
    storage: Arc<dyn StorageBackend>,
    root_path: String,
    layout: Arc<dyn RegionLayout>,
    enable_lz4: bool,
}

impl ChunkRegionContainer {
    /// Constructs a container over the given storage and region layout.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        root_path: impl Into<String>,
        layout: Arc<dyn RegionLayout>,
        enable_lz4: bool,
    ) -> Self {
        Self {
            storage,
            root_path: root_path.into(),
            layout,
            enable_lz4,
        }
    }

    /// The region layout the container stores spans under.
    pub fn layout(&self) -> &Arc<dyn RegionLayout> {
        &self.layout
    }

    /// Writes a region atomically: readers see the previous file or the new
    /// one, never a partial write. An empty snapshot removes the file.
    pub fn save_region(&self, region: &ChunkRegionSnapshot) -> PersistenceResult<()> {
        let path = paths::region_path(&self.root_path, &region.key);
        if region.chunks.is_empty() {
            self.storage.remove(&path)?;
            return Ok(());
        }

        let mut columns: Vec<Vec<&ChunkSnapshot>> = vec![Vec::new(); REGION_COLUMN_COUNT];
        for snapshot in &region.chunks {
            let local_x = snapshot.key.x - region.key.x * REGION_SPAN;
            let local_z = snapshot.key.z - region.key.z * REGION_SPAN;
            if !(0..REGION_SPAN).contains(&local_x) || !(0..REGION_SPAN).contains(&local_z) {
                warn!(region = %region.key, key = ?snapshot.key, "Dropping span outside its region");
                continue;
            }
            columns[region_column_index(&region.key, snapshot.key)].push(snapshot);
        }

        let mut offsets = [-1i32; REGION_COLUMN_COUNT];
        let mut columns_bytes: Vec<u8> = Vec::new();
        let mut columns_written = 0u32;
        for (index, column) in columns.iter_mut().enumerate() {
            if column.is_empty() {
                continue;
            }
            column.sort_by_key(|snapshot| snapshot.key.y);
            offsets[index] = columns_bytes.len() as i32;
            columns_written += 1;

            let mut entries: Vec<u8> = Vec::new();
            for snapshot in column.iter() {
                let mut blob = Vec::new();
                encode_chunk_data(&snapshot.data, &mut blob);
                entries
                    .write_u32::<BigEndian>(ENTRY_KEY_BYTES + blob.len() as u32)
                    .expect("vec write");
                entries.write_i32::<BigEndian>(snapshot.key.x).expect("vec write");
                entries.write_i32::<BigEndian>(snapshot.key.y).expect("vec write");
                entries.write_i32::<BigEndian>(snapshot.key.z).expect("vec write");
                entries.extend_from_slice(&blob);
            }

            let column_byte_size = 4 + 4 + 1 + entries.len();
            columns_bytes
                .write_i32::<BigEndian>(column_byte_size as i32)
                .expect("vec write");
            columns_bytes
                .write_u32::<BigEndian>(REGION_FORMAT_VERSION)
                .expect("vec write");
            columns_bytes.push(column.len() as u8);
            columns_bytes.extend_from_slice(&entries);
        }

        let max_offset = offsets.iter().copied().max().unwrap_or(-1);
        let offset_type = if max_offset < i16::MAX as i32 {
            OFFSET_TYPE_I16
        } else {
            OFFSET_TYPE_I32
        };

        let mut payload: Vec<u8> = Vec::with_capacity(1 + columns_bytes.len());
        payload.push(offset_type);
        for &offset in &offsets {
            match offset_type {
                OFFSET_TYPE_I16 => payload.write_i16::<BigEndian>(offset as i16).expect("vec write"),
                _ => payload.write_i32::<BigEndian>(offset).expect("vec write"),
            }
        }
        payload.extend_from_slice(&columns_bytes);

        let mut file: Vec<u8> = Vec::with_capacity(payload.len() + 24);
        file.write_u32::<BigEndian>(REGION_MAGIC).expect("vec write");
        file.write_u32::<BigEndian>(REGION_FORMAT_VERSION).expect("vec write");
        if self.enable_lz4 {
            let compressed = lz4_flex::block::compress(&payload);
            file.write_u32::<BigEndian>(COMPRESSION_LZ4).expect("vec write");
            file.write_u32::<BigEndian>(columns_written).expect("vec write");
            file.write_u32::<BigEndian>(compressed.len() as u32).expect("vec write");
            file.write_u32::<BigEndian>(payload.len() as u32).expect("vec write");
            file.extend_from_slice(&compressed);
        } else {
            file.write_u32::<BigEndian>(COMPRESSION_NONE).expect("vec write");
            file.write_u32::<BigEndian>(columns_written).expect("vec write");
            file.extend_from_slice(&payload);
        }

        let mut session = self.storage.open_write(&path, AtomicWriteOptions::default())?;
        std::io::Write::write_all(&mut session, &file)?;
        session.commit()?;
        Ok(())
    }

    /// Loads a region. A missing file yields an empty snapshot; a chunk entry
    /// that fails to decode is skipped and the rest of the region loads.
    pub fn load_region(&self, key: &RegionKey) -> PersistenceResult<ChunkRegionSnapshot> {
        let mut region = ChunkRegionSnapshot::empty(key.clone());
        let path = paths::region_path(&self.root_path, key);
        if !self.storage.exists(&path)? {
            return Ok(region);
        }
        let file = self.storage.read_all(&path)?;
        let mut header = Cursor::new(file.as_slice());

        let magic = header
            .read_u32::<BigEndian>()
            .map_err(|_| PersistenceError::format("truncated header"))?;
        if magic != REGION_MAGIC {
            return Err(PersistenceError::format(format!("invalid magic 0x{magic:08X}")));
        }
        let version = header
            .read_u32::<BigEndian>()
            .map_err(|_| PersistenceError::format("truncated header"))?;
        if version > REGION_FORMAT_VERSION {
            return Err(PersistenceError::format(format!("unsupported version {version}")));
        }
        let compression = header
            .read_u32::<BigEndian>()
            .map_err(|_| PersistenceError::format("truncated header"))?;
        let _column_count = header
            .read_u32::<BigEndian>()
            .map_err(|_| PersistenceError::format("truncated header"))?;

        let payload: Vec<u8> = match compression {
            COMPRESSION_NONE => file[header.position() as usize..].to_vec(),
            COMPRESSION_LZ4 => {
                let compressed_size = header
                    .read_u32::<BigEndian>()
                    .map_err(|_| PersistenceError::format("truncated header"))?
                    as usize;
                let decompressed_size = header
                    .read_u32::<BigEndian>()
                    .map_err(|_| PersistenceError::format("truncated header"))?
                    as usize;
                let start = header.position() as usize;
                let compressed = file
                    .get(start..start + compressed_size)
                    .ok_or_else(|| PersistenceError::format("truncated compressed payload"))?;
                lz4_flex::block::decompress(compressed, decompressed_size)
                    .map_err(|e| PersistenceError::format(format!("LZ4 decompression failed: {e}")))?
            }
            other => {
                return Err(PersistenceError::format(format!("unknown compression type {other}")));
            }
        };

        let mut cursor = Cursor::new(payload.as_slice());
        let offset_type = cursor
            .read_u8()
            .map_err(|_| PersistenceError::format("truncated offset table"))?;
        let mut offsets = [-1i32; REGION_COLUMN_COUNT];
        for offset in offsets.iter_mut() {
            *offset = match offset_type {
                OFFSET_TYPE_I8 => cursor.read_i8().map(i32::from),
                OFFSET_TYPE_I16 => cursor.read_i16::<BigEndian>().map(i32::from),
                OFFSET_TYPE_I32 => cursor.read_i32::<BigEndian>(),
                other => {
                    return Err(PersistenceError::format(format!("unknown offset type {other}")));
                }
            }
            .map_err(|_| PersistenceError::format("truncated offset table"))?;
        }
        let columns_start = cursor.position() as usize;

        for &offset in offsets.iter() {
            if offset < 0 {
                continue;
            }
            let column_start = columns_start + offset as usize;
            if column_start + 9 > payload.len() {
                return Err(PersistenceError::format("column offset out of range"));
            }
            let mut column = Cursor::new(&payload[column_start..]);
            let column_byte_size = column.read_i32::<BigEndian>().expect("bounds checked");
            if column_byte_size <= 0 {
                continue;
            }
            let _format_version = column.read_u32::<BigEndian>().expect("bounds checked");
            let num_chunks = column.read_u8().expect("bounds checked");

            for _ in 0..num_chunks {
                let entry_len = column
                    .read_u32::<BigEndian>()
                    .map_err(|_| PersistenceError::format("truncated column"))?;
                if entry_len < ENTRY_KEY_BYTES {
                    return Err(PersistenceError::format("invalid chunk entry length"));
                }
                let x = column
                    .read_i32::<BigEndian>()
                    .map_err(|_| PersistenceError::format("truncated chunk entry"))?;
                let y = column
                    .read_i32::<BigEndian>()
                    .map_err(|_| PersistenceError::format("truncated chunk entry"))?;
                let z = column
                    .read_i32::<BigEndian>()
                    .map_err(|_| PersistenceError::format("truncated chunk entry"))?;
                let blob_len = (entry_len - ENTRY_KEY_BYTES) as usize;
                let blob_start = column.position() as usize;
                let blob = payload[column_start..]
                    .get(blob_start..blob_start + blob_len)
                    .ok_or_else(|| PersistenceError::format("truncated chunk entry"))?;
                column.set_position((blob_start + blob_len) as u64);

                let storage_key = StorageChunkKey::new(x, y, z);
                let span = self.layout.span_for_storage_key(storage_key);
                match decode_chunk_data(span, blob) {
                    Ok(data) => region.chunks.push(ChunkSnapshot {
                        key: storage_key,
                        data,
                    }),
                    Err(e) => {
                        warn!(region = %key, key = ?storage_key, "Skipping undecodable chunk entry: {e}");
                    }
                }
            }
        }
        Ok(region)
    }

    /// Enumerates the persisted regions of a zone.
    pub fn list_regions(&self, zone_id: &str) -> PersistenceResult<Vec<RegionKey>> {
        let dir = paths::region_dir(&self.root_path, zone_id);
        let mut out = Vec::new();
        for name in self.storage.list(&dir)? {
            if let Some((x, y, z)) = paths::parse_region_file_name(&name) {
                out.push(RegionKey::new(kstring::KString::from_ref(zone_id), x, y, z));
            }
        }
        Ok(out)
    }

    /// Cheap existence probe used by the loader's presence cache.
    pub fn region_exists(&self, key: &RegionKey) -> bool {
        let path = paths::region_path(&self.root_path, key);
        self.storage.exists(&path).unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use strata_schemas::coordinates::ChunkCoord;
    use strata_schemas::region::{ChunkData, SubchunkRegionLayout};
    use strata_schemas::voxel::block::{BlockId, BlockState};
    use strata_schemas::voxel::chunk::Chunk;

    use super::*;
    use crate::storage::MemoryBackend;

    fn container(enable_lz4: bool) -> (ChunkRegionContainer, MemoryBackend) {
        let backend = MemoryBackend::new();
        let container = ChunkRegionContainer::new(
            Arc::new(backend.clone()),
            "world",
            Arc::new(SubchunkRegionLayout),
            enable_lz4,
        );
        (container, backend)
    }

    fn sample_region(key: &RegionKey) -> ChunkRegionSnapshot {
        let layout = SubchunkRegionLayout;
        let mut chunk = Chunk::new();
        for i in 0..64usize {
            chunk.put(
                strata_schemas::coordinates::InChunkPos::try_from_index(i * 97 % 32768).unwrap(),
                BlockState::new(BlockId((i % 5 + 1) as u16)),
            );
        }
        let base = ChunkCoord::new(key.x * 8, key.y * 8, key.z * 8);
        let mut snapshot = ChunkRegionSnapshot::empty(key.clone());
        for coord in [base, base.offset(1, 2, 3), base.offset(7, 7, 7)] {
            for storage_key in layout.storage_keys_for_chunk(coord) {
                let span = layout.span_for_storage_key(storage_key);
                let data = ChunkData::from_chunk(&chunk, span);
                if data.is_all_air() {
                    continue;
                }
                snapshot.chunks.push(ChunkSnapshot {
                    key: storage_key,
                    data,
                });
            }
        }
        assert!(!snapshot.chunks.is_empty());
        snapshot
    }

    fn normalize(mut snapshot: ChunkRegionSnapshot) -> ChunkRegionSnapshot {
        snapshot.chunks.sort_by_key(|c| c.key);
        snapshot
    }

    #[test]
    fn round_trip_uncompressed() {
        let (container, _) = container(false);
        let key = RegionKey::new("strata:default", 0, 0, 0);
        let region = sample_region(&key);
        container.save_region(&region).unwrap();
        let loaded = container.load_region(&key).unwrap();
        assert_eq!(normalize(loaded), normalize(region));
    }

    #[test]
    fn round_trip_lz4() {
        let (container, _) = container(true);
        let key = RegionKey::new("strata:default", -1, 2, -3);
        let region = sample_region(&key);
        container.save_region(&region).unwrap();
        let loaded = container.load_region(&key).unwrap();
        assert_eq!(normalize(loaded), normalize(region));
    }

    #[test]
    fn missing_region_loads_empty_and_empty_region_removes_file() {
        let (container, backend) = container(false);
        let key = RegionKey::new("strata:default", 4, 4, 4);
        assert!(container.load_region(&key).unwrap().chunks.is_empty());
        assert!(!container.region_exists(&key));

        let region = sample_region(&key);
        container.save_region(&region).unwrap();
        assert!(container.region_exists(&key));
        assert_eq!(backend.file_count(), 1);

        container.save_region(&ChunkRegionSnapshot::empty(key.clone())).unwrap();
        assert!(!container.region_exists(&key));
        assert_eq!(backend.file_count(), 0);
    }

    #[test]
    fn list_regions_parses_file_names() {
        let (container, _) = container(false);
        for key in [
            RegionKey::new("strata:default", 0, 0, 0),
            RegionKey::new("strata:default", -2, 5, 1),
        ] {
            container.save_region(&sample_region(&key)).unwrap();
        }
        let mut listed = container.list_regions("strata:default").unwrap();
        listed.sort_by_key(|k| (k.x, k.y, k.z));
        assert_eq!(
            listed,
            [
                RegionKey::new("strata:default", -2, 5, 1),
                RegionKey::new("strata:default", 0, 0, 0),
            ]
        );
    }

    #[test]
    fn corrupt_headers_are_format_errors() {
        let (container, backend) = container(false);
        let key = RegionKey::new("strata:default", 0, 0, 0);
        container.save_region(&sample_region(&key)).unwrap();
        let path = paths::region_path("world", &key);
        let good = backend.read_all(&path).unwrap();

        let mut bad_magic = good.clone();
        bad_magic[0] ^= 0xFF;
        backend.write_all_atomic(&path, &bad_magic).unwrap();
        assert!(matches!(
            container.load_region(&key),
            Err(PersistenceError::Format(_))
        ));

        let mut bad_version = good.clone();
        bad_version[7] = 99;
        backend.write_all_atomic(&path, &bad_version).unwrap();
        assert!(matches!(
            container.load_region(&key),
            Err(PersistenceError::Format(_))
        ));

        let mut bad_compression = good.clone();
        bad_compression[11] = 17;
        backend.write_all_atomic(&path, &bad_compression).unwrap();
        assert!(matches!(
            container.load_region(&key),
            Err(PersistenceError::Format(_))
        ));

        backend.write_all_atomic(&path, &good[..good.len() / 2]).unwrap();
        assert!(matches!(
            container.load_region(&key),
            Err(PersistenceError::Format(_))
        ));
    }

    #[test]
    fn undecodable_chunk_entry_is_skipped() {
        let (container, backend) = container(false);
        let key = RegionKey::new("strata:default", 0, 0, 0);
        let region = sample_region(&key);
        container.save_region(&region).unwrap();
        let path = paths::region_path("world", &key);
        let mut bytes = backend.read_all(&path).unwrap();

        // First entry's palette length lives right after the offset table,
        // the column header (9 bytes) and the entry header (16).
        let table_entry_width = match bytes[16] {
            1 => 1,
            2 => 2,
            _ => 4,
        };
        let palette_len_at = 16 + 1 + table_entry_width * REGION_COLUMN_COUNT + 9 + 16;
        bytes[palette_len_at] = 0;
        bytes[palette_len_at + 1] = 0;
        backend.write_all_atomic(&path, &bytes).unwrap();

        let loaded = container.load_region(&key).unwrap();
        assert_eq!(loaded.chunks.len(), region.chunks.len() - 1);
    }
}
