//! Palette encoding of one span's block data.
//!
//! Wire form: `paletteLen(u16)` followed by the palette entries
//! (`id(u16) metadata(u8) light(u8)` each), then the per-voxel palette
//! indices. A single-entry palette needs no index data; palettes up to 256
//! entries index with one byte per voxel, larger ones with two. All integers
//! are big-endian.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use strata_schemas::region::{ChunkData, ChunkSpan};
use strata_schemas::voxel::block::{BlockId, BlockState};

use crate::error::{PersistenceError, PersistenceResult};
use crate::prelude::*;

/// Serializes a span's blocks into the palette wire form.
pub fn encode_chunk_data(data: &ChunkData, out: &mut Vec<u8>) {
    debug_assert_eq!(data.blocks.len(), data.span.volume());
    let mut palette: Vec<BlockState> = Vec::new();
    let mut palette_index: HashMap<BlockState, u16> = HashMap::new();
    let mut indices: Vec<u16> = Vec::with_capacity(data.blocks.len());
    for &block in &data.blocks {
        let index = *palette_index.entry(block).or_insert_with(|| {
            palette.push(block);
            (palette.len() - 1) as u16
        });
        indices.push(index);
    }

    out.write_u16::<BigEndian>(palette.len() as u16).expect("vec write");
    for entry in &palette {
        out.write_u16::<BigEndian>(entry.id.0).expect("vec write");
        out.push(entry.metadata);
        out.push(entry.light);
    }
    match palette.len() {
        0 | 1 => {}
        2..=256 => {
            for &index in &indices {
                out.push(index as u8);
            }
        }
        _ => {
            for &index in &indices {
                out.write_u16::<BigEndian>(index).expect("vec write");
            }
        }
    }
}

/// Decodes the palette wire form back into a span's blocks.
pub fn decode_chunk_data(span: ChunkSpan, bytes: &[u8]) -> PersistenceResult<ChunkData> {
    let volume = span.volume();
    let mut cursor = Cursor::new(bytes);
    let palette_len = cursor
        .read_u16::<BigEndian>()
        .map_err(|_| PersistenceError::codec("truncated palette length"))? as usize;
    if palette_len == 0 {
        return Err(PersistenceError::codec("empty palette"));
    }
    let mut palette = Vec::with_capacity(palette_len);
    for _ in 0..palette_len {
        let id = cursor
            .read_u16::<BigEndian>()
            .map_err(|_| PersistenceError::codec("truncated palette entry"))?;
        let metadata = cursor
            .read_u8()
            .map_err(|_| PersistenceError::codec("truncated palette entry"))?;
        let light = cursor
            .read_u8()
            .map_err(|_| PersistenceError::codec("truncated palette entry"))?;
        palette.push(BlockState {
            id: BlockId(id),
            metadata,
            light,
        });
    }

    let mut blocks = Vec::with_capacity(volume);
    if palette_len == 1 {
        blocks.resize(volume, palette[0]);
    } else {
        for _ in 0..volume {
            let index = if palette_len <= 256 {
                cursor
                    .read_u8()
                    .map_err(|_| PersistenceError::codec("truncated block indices"))? as usize
            } else {
                cursor
                    .read_u16::<BigEndian>()
                    .map_err(|_| PersistenceError::codec("truncated block indices"))? as usize
            };
            let state = *palette
                .get(index)
                .ok_or_else(|| PersistenceError::codec(format!("palette index {index} out of range")))?;
            blocks.push(state);
        }
    }
    Ok(ChunkData { span, blocks })
}

#[cfg(test)]
mod test {
    use bevy_math::IVec3;
    use strata_schemas::coordinates::ChunkCoord;

    use super::*;

    fn span() -> ChunkSpan {
        ChunkSpan {
            chunk: ChunkCoord::new(1, 2, 3),
            offset: IVec3::new(16, 0, 16),
            size: IVec3::splat(16),
        }
    }

    fn round_trip(data: &ChunkData) -> ChunkData {
        let mut bytes = Vec::new();
        encode_chunk_data(data, &mut bytes);
        decode_chunk_data(data.span, &bytes).unwrap()
    }

    #[test]
    fn uniform_span_uses_no_index_bytes() {
        let span = span();
        let data = ChunkData {
            span,
            blocks: vec![BlockState::new(BlockId(9)); span.volume()],
        };
        let mut bytes = Vec::new();
        encode_chunk_data(&data, &mut bytes);
        assert_eq!(bytes.len(), 2 + 4);
        assert_eq!(round_trip(&data), data);
    }

    #[test]
    fn mixed_span_round_trips() {
        let span = span();
        let mut blocks = vec![BlockState::AIR; span.volume()];
        blocks[0] = BlockState::new(BlockId(1));
        blocks[100] = BlockState {
            id: BlockId(2),
            metadata: 7,
            light: 0xF3,
        };
        blocks[span.volume() - 1] = BlockState::new(BlockId(1));
        let data = ChunkData { span, blocks };
        assert_eq!(round_trip(&data), data);
    }

    #[test]
    fn wide_palette_round_trips() {
        let span = span();
        let blocks: Vec<BlockState> = (0..span.volume())
            .map(|i| BlockState {
                id: BlockId((i % 500) as u16),
                metadata: (i % 3) as u8,
                light: 0,
            })
            .collect();
        let data = ChunkData { span, blocks };
        assert_eq!(round_trip(&data), data);
    }

    #[test]
    fn truncated_input_is_a_codec_error() {
        let span = span();
        let data = ChunkData {
            span,
            blocks: (0..span.volume())
                .map(|i| BlockState::new(BlockId((i % 4) as u16)))
                .collect(),
        };
        let mut bytes = Vec::new();
        encode_chunk_data(&data, &mut bytes);
        for cut in [0, 1, 3, bytes.len() - 1] {
            let err = decode_chunk_data(span, &bytes[..cut]).unwrap_err();
            assert!(matches!(err, PersistenceError::Codec(_)), "cut at {cut}: {err}");
        }
    }
}
