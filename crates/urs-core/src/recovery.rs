//! The crash-recovery sweep (spec.md §4.7): run once at startup, before
//! any new insert is allowed, to find and close whatever chunk was left
//! open by a transaction that never reached its own close (the process
//! died mid-critical-section, so no NOOP ever made it into the WAL).
//!
//! Simplification against the general case: a chunk header that itself
//! straddles a page boundary (as opposed to just its `size` field, which
//! I4 always allows) is rejected with `UndoPanic` rather than
//! reassembled byte-by-byte — every chunk this reference implementation
//! creates keeps its header on one page, so the sweep never needs to.

use urs_common::traits::{BufferManager, ReadBufferMode, RmgrId, TypeLayer, UndoLogAllocator, WalSink};
use urs_common::{
    undo_assert, ChunkHeader, UndoPageHeader, UndoRecPtr, BLCKSZ, SIZE_OF_CHUNK_HEADER,
};
use urs_wal::BufDataOp;

use crate::context::UndoContext;

impl<A, B, W, T> UndoContext<A, B, W, T>
where
    A: UndoLogAllocator,
    B: BufferManager,
    W: WalSink,
    T: TypeLayer,
{
    fn find_start_of_final_chunk_in_undo_log(
        &self,
        log_number: urs_common::UndoLogNumber,
        insert: urs_common::UndoLogOffset,
    ) -> UndoRecPtr {
        let blkno = (insert - 1) / BLCKSZ as u64;
        let buf = self.buffers.pin(log_number, blkno, ReadBufferMode::Normal);
        self.buffers.lock_shared(buf);
        let location = self.buffers.with_page(buf, |page| {
            let hdr = UndoPageHeader::read(page);
            if hdr.first_chunk != 0 {
                UndoRecPtr::new(log_number, blkno * BLCKSZ as u64 + hdr.first_chunk as u64)
            } else {
                undo_assert!(
                    hdr.continue_chunk.is_valid(),
                    "undo log {log_number} page {blkno} has neither first_chunk nor continue_chunk set"
                );
                hdr.continue_chunk
            }
        });
        self.buffers.unlock_release(buf);
        location
    }

    fn read_chunk_header(&self, header_offset: UndoRecPtr) -> ChunkHeader {
        let log_number = header_offset.log_number();
        let blkno = header_offset.block_number();
        let page_offset = header_offset.page_offset();
        let buf = self.buffers.pin(log_number, blkno, ReadBufferMode::Normal);
        self.buffers.lock_shared(buf);
        let header = self.buffers.with_page(buf, |page| {
            undo_assert!(
                page_offset + SIZE_OF_CHUNK_HEADER <= BLCKSZ,
                "chunk header at {header_offset:?} straddles a page boundary past the size field"
            );
            ChunkHeader::from_bytes(&page[page_offset..page_offset + SIZE_OF_CHUNK_HEADER])
        });
        self.buffers.unlock_release(buf);
        header
    }

    /// `close_dangling_record_sets` (spec.md §4.7). Must be called once,
    /// before the context accepts any new `insert`.
    pub fn close_dangling_record_sets(&mut self) {
        let mut logs = Vec::with_capacity(self.config.expected_log_count);
        self.allocator.for_each_log(&mut |log| logs.push(log));

        for log in logs {
            let log_number = self.allocator.log_number(log);
            let insert = self.allocator.meta_insert(log);
            let discard = self.allocator.meta_discard(log);
            if insert <= discard {
                continue;
            }

            let header_offset = self.find_start_of_final_chunk_in_undo_log(log_number, insert);
            let header = self.read_chunk_header(header_offset);
            if header.size != 0 {
                continue; // already closed
            }

            let chunk_size = insert - header_offset.offset();

            // Walk previous_chunk links back to the first chunk, refusing
            // to close a record set any of whose earlier chunks has
            // already been discarded.
            let mut walk = header.previous_chunk;
            let mut first_chunk_header_location = header_offset;
            while walk.is_valid() {
                undo_assert!(
                    walk.offset() > discard,
                    "cannot close a dangling record set whose earlier chunk at {walk:?} has already been discarded"
                );
                first_chunk_header_location = walk;
                let predecessor = self.read_chunk_header(walk);
                walk = predecessor.previous_chunk;
            }

            let type_header_size = self.type_layer.type_header_size(header.rs_type) as usize;
            let type_header = self.read_type_header(header_offset, type_header_size);

            self.close_dangling_chunk(
                log,
                log_number,
                header_offset,
                chunk_size,
                header.rs_type,
                first_chunk_header_location,
                &type_header,
            );
        }
    }

    fn read_type_header(&self, header_offset: UndoRecPtr, type_header_size: usize) -> Vec<u8> {
        if type_header_size == 0 {
            return Vec::new();
        }
        let log_number = header_offset.log_number();
        let blkno = header_offset.block_number();
        let page_offset = header_offset.page_offset() + SIZE_OF_CHUNK_HEADER;
        let buf = self.buffers.pin(log_number, blkno, ReadBufferMode::Normal);
        self.buffers.lock_shared(buf);
        let bytes = self.buffers.with_page(buf, |page| {
            undo_assert!(
                page_offset + type_header_size <= BLCKSZ,
                "type header at {header_offset:?} straddles a page boundary"
            );
            page[page_offset..page_offset + type_header_size].to_vec()
        });
        self.buffers.unlock_release(buf);
        bytes
    }

    #[allow(clippy::too_many_arguments)]
    fn close_dangling_chunk(
        &mut self,
        log: A::Log,
        log_number: urs_common::UndoLogNumber,
        header_offset: UndoRecPtr,
        chunk_size: urs_common::UndoLogOffset,
        rs_type: urs_common::UndoRsType,
        first_chunk_header_location: UndoRecPtr,
        type_header: &[u8],
    ) {
        let page_offset = header_offset.page_offset();
        let blkno = header_offset.block_number();
        let straddles = page_offset + 8 > BLCKSZ;

        let buf = self.buffers.pin(log_number, blkno, ReadBufferMode::Normal);
        let buf2 = if straddles {
            Some(self.buffers.pin(log_number, blkno + 1, ReadBufferMode::Normal))
        } else {
            None
        };
        self.buffers.lock_exclusive(buf);
        if let Some(b) = buf2 {
            self.buffers.lock_exclusive(b);
        }

        let size_bytes = ChunkHeader::size_bytes(chunk_size);

        self.wal.begin_insert();
        let mut bufdata = urs_wal::BufData::new();
        bufdata.push(BufDataOp::CloseChunk {
            chunk_size_page_offset: page_offset as u16,
            chunk_size,
        });
        bufdata.push(BufDataOp::Close {
            urs_type: rs_type,
            type_header: type_header.to_vec(),
        });
        if first_chunk_header_location.as_u64() != header_offset.as_u64() {
            bufdata.push(BufDataOp::CloseMultiChunk {
                first_chunk_header_location,
            });
        }

        let written = self
            .buffers
            .with_page(buf, |page| urs_pagestore::codec::overwrite(page, page_offset, 0, &size_bytes));
        self.buffers.mark_dirty(buf);
        self.wal.register_buffer(0, log_number, blkno, false);
        self.wal.register_buffer_data(0, &bufdata.encode());

        if let Some(b) = buf2 {
            self.buffers.with_page(b, |page| {
                urs_pagestore::codec::overwrite(page, urs_common::SIZE_OF_UNDO_PAGE_HEADER, written, &size_bytes)
            });
            self.buffers.mark_dirty(b);
            self.wal.register_buffer(1, log_number, blkno + 1, false);
        }

        let lsn = self.wal.insert(RmgrId::Undo, None);
        self.buffers.set_lsn(buf, lsn);
        if let Some(b) = buf2 {
            self.buffers.set_lsn(b, lsn);
        }
        self.buffers.unlock_release(buf);
        if let Some(b) = buf2 {
            self.buffers.unlock_release(b);
        }

        if rs_type == urs_common::UndoRsType::TRANSACTION {
            let end = UndoRecPtr::new(log_number, self.allocator.meta_insert(log));
            let begin = first_chunk_header_location;
            self.type_layer
                .on_close_record_set(rs_type, type_header, begin, end, false, false);
        }
    }
}
