//! Constants and small value types shared by the whole workspace.

use serde::{Deserialize, Serialize};

use crate::ptr::UndoRecPtr;

/// Identifier of an undo log. Fits in a relation-number-sized field.
pub type UndoLogNumber = u32;

/// Unsigned byte offset within one undo log.
pub type UndoLogOffset = u64;

/// Page size, fixed at compile time. Must be a power of two no larger
/// than 32 KiB; the reference value here matches the scenarios worked
/// through by the testable-properties suite.
pub const BLCKSZ: usize = 8192;

/// Size of `UndoPageHeader` on the wire: `insertion_point` (u16) +
/// `first_chunk` (u16) + `continue_chunk` (u64).
pub const SIZE_OF_UNDO_PAGE_HEADER: usize = 12;

/// Size of `UndoRecordSetChunkHeader` on the wire: `size` (u64) +
/// `previous_chunk` (u64) + `type` (u8) padded to the 8-byte alignment
/// of `size`.
pub const SIZE_OF_CHUNK_HEADER: usize = 24;

/// Largest permitted logical offset within one undo log (~1 TiB). This
/// is also the range that `UndoRecPtr`'s offset bits must cover.
pub const UNDO_LOG_MAX_SIZE: u64 = 1u64 << 40;

/// Persistence class of a record set. WAL is only emitted for
/// `Permanent`; all three classes still maintain in-memory chunk
/// headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    Temp,
    Unlogged,
    Permanent,
}

impl Persistence {
    /// Whether an insertion/close under this persistence class needs a
    /// WAL record (`URSNeedsWAL` in the original source).
    pub fn needs_wal(self) -> bool {
        matches!(self, Persistence::Permanent)
    }
}

/// The type tag stored in every chunk header, identifying which
/// type-specific layer owns the record set (e.g. `TRANSACTION`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UndoRsType(pub u8);

impl UndoRsType {
    /// The one concrete type layer this workspace ships: `urs-txn`'s
    /// transaction undo layer.
    pub const TRANSACTION: UndoRsType = UndoRsType(1);
}

/// In-memory (and on-the-wire, minus padding) representation of
/// `UndoRecordSetChunkHeader`. `size` is logically first so that closing
/// a chunk is a single atomic 8-byte overwrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Total bytes from this header to the end of the chunk. Zero iff
    /// the chunk (and hence the record set, if this is the final chunk)
    /// is still open.
    pub size: UndoLogOffset,
    /// Header location of the previous chunk of the same record set, or
    /// `UndoRecPtr::INVALID` for the first chunk.
    pub previous_chunk: UndoRecPtr,
    pub rs_type: UndoRsType,
}

impl ChunkHeader {
    pub fn to_bytes(self) -> [u8; SIZE_OF_CHUNK_HEADER] {
        let mut out = [0u8; SIZE_OF_CHUNK_HEADER];
        out[0..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..16].copy_from_slice(&self.previous_chunk.as_u64().to_le_bytes());
        out[16] = self.rs_type.0;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= SIZE_OF_CHUNK_HEADER);
        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(&bytes[0..8]);
        let mut prev_bytes = [0u8; 8];
        prev_bytes.copy_from_slice(&bytes[8..16]);
        ChunkHeader {
            size: u64::from_le_bytes(size_bytes),
            previous_chunk: UndoRecPtr::from_u64(u64::from_le_bytes(prev_bytes)),
            rs_type: UndoRsType(bytes[16]),
        }
    }

    /// Only the `size` field, little-endian, as written/overwritten on
    /// close — this is what may straddle two pages.
    pub fn size_bytes(size: UndoLogOffset) -> [u8; 8] {
        size.to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_header_round_trips() {
        let hdr = ChunkHeader {
            size: 96,
            previous_chunk: UndoRecPtr::new(3, 128),
            rs_type: UndoRsType::TRANSACTION,
        };
        let bytes = hdr.to_bytes();
        assert_eq!(bytes.len(), SIZE_OF_CHUNK_HEADER);
        assert_eq!(ChunkHeader::from_bytes(&bytes), hdr);
    }

    #[test]
    fn needs_wal_only_for_permanent() {
        assert!(Persistence::Permanent.needs_wal());
        assert!(!Persistence::Unlogged.needs_wal());
        assert!(!Persistence::Temp.needs_wal());
    }
}
