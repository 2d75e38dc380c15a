//! The close protocol (spec.md §4.5): pinning the active chunk's 8-byte
//! `size` field, staging `CLOSE_CHUNK`/`CLOSE`/`CLOSE_MULTI_CHUNK`
//! bufdata, and overwriting the field in place — possibly straddling two
//! pages, exactly like the record-insertion codec it shares with
//! `planner.rs`.

use urs_common::traits::{BufferManager, TypeLayer, UndoLogAllocator, WalSink};
use urs_common::{ChunkHeader, BLCKSZ, SIZE_OF_UNDO_PAGE_HEADER};

use crate::context::{UndoContext, UndoId};
use crate::record_set::UndoState;

impl<A, B, W, T> UndoContext<A, B, W, T>
where
    A: UndoLogAllocator,
    B: BufferManager,
    W: WalSink,
    T: TypeLayer,
{
    /// Pin the page(s) holding `chunks[chunk_idx]`'s `size` field into
    /// the buffer tracker, recording the buffer index/indices on the
    /// chunk. Returns `false` if there are no chunks at all.
    pub fn prepare_to_mark_chunk_closed(&mut self, id: UndoId, chunk_idx: usize) -> bool {
        let urs = self.get(id);
        if urs.chunks.is_empty() {
            return false;
        }
        let chunk = urs.chunks[chunk_idx];
        let log_number = chunk.header_offset.log_number();
        let page_offset = chunk.header_offset.page_offset();
        let first_blkno = chunk.header_offset.block_number();
        let straddles = page_offset + 8 > BLCKSZ;

        let log = chunk.log;
        let first_idx =
            self.get_mut(id)
                .find_or_pin_buffer(self.buffers.as_ref(), log, log_number, first_blkno, false);
        let second_idx = if straddles {
            Some(self.get_mut(id).find_or_pin_buffer(
                self.buffers.as_ref(),
                log,
                log_number,
                first_blkno + 1,
                false,
            ))
        } else {
            None
        };

        self.get_mut(id).chunks[chunk_idx].size_buf_idx = [Some(first_idx), second_idx];
        true
    }

    /// `prepare_to_mark_closed` (spec.md §4.5): pins the *active* (last)
    /// chunk's size field. Returns `false` if there is nothing to close.
    pub fn prepare_to_mark_closed(&mut self, id: UndoId) -> bool {
        let last = match self.get(id).chunks.len().checked_sub(1) {
            Some(idx) => idx,
            None => return false,
        };
        self.prepare_to_mark_chunk_closed(id, last)
    }

    /// `mark_closed` (spec.md §4.5): close the whole record set. Must be
    /// called with the active chunk's size field already pinned via
    /// `prepare_to_mark_closed`.
    pub fn mark_closed(&mut self, id: UndoId) {
        let last = self.get(id).chunks.len() - 1;
        self.mark_chunk_closed(id, last, true);
    }

    /// `mark_chunk_closed(prev_chunk, close_urs)` (spec.md §4.5): the
    /// shared overwrite-and-stage-bufdata algorithm. `close_urs` is
    /// `false` for the intra-operation rollover case in `insert`, `true`
    /// for a standalone close.
    pub fn mark_chunk_closed(&mut self, id: UndoId, chunk_idx: usize, close_urs: bool) {
        let needs_wal = self.get(id).persistence.needs_wal();
        let chunk = self.get(id).chunks[chunk_idx];
        let insert = self.allocator.meta_insert(chunk.log);
        let size = insert - chunk.header_offset.offset();

        let size_bytes = ChunkHeader::size_bytes(size);
        let page_offset = chunk.header_offset.page_offset();
        let first_idx = chunk.size_buf_idx[0]
            .unwrap_or_else(|| urs_common::error::UndoPanic::new(
                "mark_chunk_closed called without prepare_to_mark_chunk_closed",
            )
            .abort());

        if needs_wal {
            let urs = self.get_mut(id);
            urs.buffers[first_idx].bufdata.push(urs_wal::BufDataOp::CloseChunk {
                chunk_size_page_offset: page_offset as u16,
                chunk_size: size,
            });
            if close_urs {
                urs.buffers[first_idx].bufdata.push(urs_wal::BufDataOp::Close {
                    urs_type: urs.rs_type,
                    type_header: urs.type_header.clone(),
                });
                if urs.chunks.len() > 1 {
                    let first_chunk_header_location = urs.chunks[0].header_offset;
                    urs.buffers[first_idx]
                        .bufdata
                        .push(urs_wal::BufDataOp::CloseMultiChunk {
                            first_chunk_header_location,
                        });
                }
            }
        }

        let buf = self.get(id).buffers[first_idx].buf;
        let written = self
            .buffers
            .with_page(buf, |page| urs_pagestore::codec::overwrite(page, page_offset, 0, &size_bytes));
        self.buffers.mark_dirty(buf);

        if written < size_bytes.len() {
            let second_idx = self.get(id).chunks[chunk_idx].size_buf_idx[1].unwrap_or_else(|| {
                urs_common::error::UndoPanic::new("size field straddled a page boundary without a second pinned buffer").abort()
            });
            let buf2 = self.get(id).buffers[second_idx].buf;
            self.buffers.with_page(buf2, |page| {
                urs_pagestore::codec::overwrite(page, SIZE_OF_UNDO_PAGE_HEADER, written, &size_bytes)
            });
            self.buffers.mark_dirty(buf2);
        }

        self.get_mut(id).chunks[chunk_idx].header_written = true;
        if close_urs {
            self.get_mut(id).state = UndoState::Closed;
        }
    }
}
