//! A single chunk: a contiguous run of bytes in one undo log, headed by
//! a chunk header carrying its eventual size (spec.md §3/§4.3).

use urs_common::UndoRecPtr;

/// `L` is the allocator's opaque log handle (`UndoLogAllocator::Log`).
#[derive(Clone, Copy, Debug)]
pub struct Chunk<L> {
    pub log: L,
    /// Location of this chunk's header — `previous_chunk` links chase
    /// these, and the recovery sweep walks them back to the first
    /// chunk.
    pub header_offset: UndoRecPtr,
    /// Whether the chunk header bytes have actually been written yet
    /// (set by `insert`, not merely planned by `prepare_to_insert`).
    /// Only a chunk with `header_written == true` needs closing when the
    /// record set rolls over to a new chunk.
    pub header_written: bool,
    /// Buffer-tracker indices of the page(s) holding this chunk's 8-byte
    /// `size` field, populated by `prepare_to_mark_chunk_closed`. A
    /// second entry means the field straddles two pages (invariant I4).
    pub size_buf_idx: [Option<usize>; 2],
}

impl<L: Copy> Chunk<L> {
    pub fn new(log: L, header_offset: UndoRecPtr) -> Self {
        Chunk {
            log,
            header_offset,
            header_written: false,
            size_buf_idx: [None, None],
        }
    }
}
