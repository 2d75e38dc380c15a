//! Shared types, constants, and collaborator traits for the undo record
//! set manager: the identifiers and on-disk layouts every other crate in
//! this workspace agrees on, plus the narrow trait boundaries that stand
//! in for the undo log allocator, the buffer manager, the WAL subsystem,
//! and the type-specific layer.

pub mod error;
pub mod ptr;
pub mod traits;
pub mod types;

pub use error::{UndoError, UndoResult};
pub use ptr::{plus_usable_bytes, UndoRecPtr};
pub use traits::{BufferManager, ReadBufferMode, RmgrId, TypeLayer, UndoLogAllocator, WalSink};
pub use types::{
    ChunkHeader, Persistence, UndoLogNumber, UndoLogOffset, UndoRsType, BLCKSZ,
    SIZE_OF_CHUNK_HEADER, SIZE_OF_UNDO_PAGE_HEADER, UNDO_LOG_MAX_SIZE,
};

/// A page buffer, exactly `BLCKSZ` bytes.
pub type Page = [u8; BLCKSZ];

/// A freshly zeroed page, as handed back by `ReadBufferMode::Zero`.
pub fn empty_page() -> Page {
    [0u8; BLCKSZ]
}

/// The page header stored at the start of every undo page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UndoPageHeader {
    /// First unused byte on this page.
    pub insertion_point: u16,
    /// Page-offset of the chunk header that *starts* on this page, or 0.
    pub first_chunk: u16,
    /// Header location of the chunk that spilled in from the previous
    /// page; valid only when `first_chunk == 0`.
    pub continue_chunk: UndoRecPtr,
}

impl UndoPageHeader {
    /// The header written into a freshly zeroed page.
    pub fn fresh() -> Self {
        UndoPageHeader {
            insertion_point: SIZE_OF_UNDO_PAGE_HEADER as u16,
            first_chunk: 0,
            continue_chunk: UndoRecPtr::INVALID,
        }
    }

    /// True if this page has not yet received any bytes and does not
    /// continue a chunk from the previous page.
    pub fn is_new_page(&self) -> bool {
        self.insertion_point == SIZE_OF_UNDO_PAGE_HEADER as u16 && self.first_chunk == 0
    }

    pub fn read(page: &Page) -> Self {
        let insertion_point = u16::from_le_bytes([page[0], page[1]]);
        let first_chunk = u16::from_le_bytes([page[2], page[3]]);
        let mut ptr_bytes = [0u8; 8];
        ptr_bytes.copy_from_slice(&page[4..12]);
        let continue_chunk = UndoRecPtr::from_u64(u64::from_le_bytes(ptr_bytes));
        UndoPageHeader {
            insertion_point,
            first_chunk,
            continue_chunk,
        }
    }

    pub fn write(&self, page: &mut Page) {
        page[0..2].copy_from_slice(&self.insertion_point.to_le_bytes());
        page[2..4].copy_from_slice(&self.first_chunk.to_le_bytes());
        page[4..12].copy_from_slice(&self.continue_chunk.as_u64().to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_page_header_round_trips() {
        let mut page = empty_page();
        let hdr = UndoPageHeader::fresh();
        hdr.write(&mut page);
        assert_eq!(UndoPageHeader::read(&page), hdr);
        assert!(hdr.is_new_page());
    }

    #[test]
    fn non_fresh_header_is_not_new_page() {
        let mut page = empty_page();
        let mut hdr = UndoPageHeader::fresh();
        hdr.insertion_point = 40;
        hdr.first_chunk = SIZE_OF_UNDO_PAGE_HEADER as u16;
        hdr.write(&mut page);
        assert!(!UndoPageHeader::read(&page).is_new_page());
    }
}
