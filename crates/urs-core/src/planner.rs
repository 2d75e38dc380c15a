//! The insertion planner (spec.md §4.3) and the writer it hands off to
//! (spec.md §4.4): computing how much space a write needs, reserving and
//! pinning it, then laying chunk header / type header / record bytes
//! onto the pinned pages in order.

use urs_common::traits::{BufferManager, RmgrId, TypeLayer, UndoLogAllocator, WalSink};
use urs_common::{
    ChunkHeader, UndoLogOffset, UndoRecPtr, BLCKSZ, SIZE_OF_CHUNK_HEADER, SIZE_OF_UNDO_PAGE_HEADER,
};
use urs_wal::BufDataOp;

use crate::chunk::Chunk;
use crate::context::{UndoContext, UndoId};
use crate::record_set::UndoState;

impl<A, B, W, T> UndoContext<A, B, W, T>
where
    A: UndoLogAllocator,
    B: BufferManager,
    W: WalSink,
    T: TypeLayer,
{
    fn header_size(&self, id: UndoId) -> usize {
        let urs = self.get(id);
        if !urs.need_chunk_header {
            0
        } else if !urs.need_type_header {
            SIZE_OF_CHUNK_HEADER
        } else {
            SIZE_OF_CHUNK_HEADER + self.type_layer.type_header_size(urs.rs_type) as usize
        }
    }

    /// `reserve_physical_undo` (spec.md §4.3 step 3). `None` means the
    /// log cannot satisfy this reservation and has been truncated and
    /// detached; the caller must roll over to a new chunk.
    fn reserve_physical_undo(
        &self,
        log: A::Log,
        recent_end: UndoLogOffset,
        total_size: u64,
    ) -> Option<(UndoLogOffset, UndoLogOffset)> {
        if self.allocator.force_truncate(log) {
            self.allocator.truncate(log);
            self.allocator.clear_force_truncate(log);
            return None;
        }
        let insert = self.allocator.meta_insert(log);
        let candidate_end = urs_common::plus_usable_bytes(insert, total_size);
        if candidate_end <= recent_end {
            return Some((insert, recent_end));
        }
        let size = self.allocator.size(log);
        if candidate_end <= size {
            self.allocator.extend(log, candidate_end);
            Some((insert, candidate_end))
        } else {
            self.allocator.truncate(log);
            None
        }
    }

    fn create_new_chunk(&mut self, id: UndoId) {
        let persistence = self.get(id).persistence;
        let log = self.allocator.get_log(persistence);
        let log_number = self.allocator.log_number(log);
        let insert = self.allocator.meta_insert(log);
        let end = self.allocator.end(log);
        let header_offset = UndoRecPtr::new(log_number, insert);

        let urs = self.get_mut(id);
        urs.chunks.push(Chunk::new(log, header_offset));
        urs.slot = Some(log);
        urs.recent_end = end;
        urs.need_chunk_header = true;
    }

    /// `prepare_to_insert(record_size)` (spec.md §4.3). Returns the
    /// pointer to the first byte of caller data; by the time this
    /// returns, every page the write will touch is pinned and
    /// exclusively locked.
    pub fn prepare_to_insert(&mut self, id: UndoId, record_size: usize) -> UndoRecPtr {
        let mut closing_chunk_idx: Option<usize> = None;

        let (reservation_start, header_size, prev_end) = loop {
            let header_size = self.header_size(id);
            let total = (record_size + header_size) as u64;

            let active = self.get(id).slot.map(|log| (log, self.get(id).recent_end));
            if let Some((log, recent_end)) = active {
                if let Some((insert, new_recent_end)) =
                    self.reserve_physical_undo(log, recent_end, total)
                {
                    let log_number = self.allocator.log_number(log);
                    self.get_mut(id).recent_end = new_recent_end;
                    break (UndoRecPtr::new(log_number, insert), header_size, recent_end);
                }
                // This log can no longer satisfy us: roll over. Tie-break
                // (spec.md §4.3): a chunk that never got a header written
                // is simply dropped; one that did gets scheduled to close.
                let last = self.get(id).chunks.len() - 1;
                if self.get(id).chunks[last].header_written {
                    closing_chunk_idx = Some(last);
                } else {
                    self.get_mut(id).chunks.pop();
                }
                self.get_mut(id).slot = None;
            }
            self.create_new_chunk(id);
        };

        // Ordering constraint (spec.md §4.3 step 5): new-chunk buffers
        // must land at lower indices than the closing chunk's, so pin
        // the new write's pages first.
        self.pin_for_insert(id, reservation_start, header_size + record_size, prev_end);
        if let Some(chunk_idx) = closing_chunk_idx {
            self.prepare_to_mark_chunk_closed(id, chunk_idx);
        }
        self.lock_all_pinned(id);

        let urs = self.get_mut(id);
        urs.begin = reservation_start;
        urs.closing_chunk_idx = closing_chunk_idx;
        reservation_start.plus_usable_bytes(header_size as u64)
    }

    fn lock_all_pinned(&self, id: UndoId) {
        self.get(id).lock_all_pinned(self.buffers.as_ref());
    }

    fn pin_for_insert(&mut self, id: UndoId, start: UndoRecPtr, total_size: usize, prev_end: UndoLogOffset) {
        if total_size == 0 {
            return;
        }
        let log_number = start.log_number();
        let log = self.get(id).slot.unwrap();
        let start_block = start.block_number();
        let last_byte_offset = urs_common::plus_usable_bytes(start.offset(), (total_size - 1) as u64);
        let end_block = last_byte_offset / BLCKSZ as u64;

        for blkno in start_block..=end_block {
            let page_start = blkno * BLCKSZ as u64;
            let is_new = page_start >= prev_end;
            self.get_mut(id)
                .find_or_pin_buffer(self.buffers.as_ref(), log, log_number, blkno, is_new);
        }
    }

    /// `insert(record_data, record_size)` (spec.md §4.4): the critical
    /// section that actually lays bytes down, having already called
    /// `prepare_to_insert`. When this persistence level needs WAL
    /// protection, the fragment writes are bracketed by a WAL critical
    /// section: `begin_insert` → stage bufdata as pages are written →
    /// `register_xlog_buffers` → `wal.insert(record_data)` → `set_lsn`
    /// → `release` (spec.md §2, §4.4).
    pub fn insert(&mut self, id: UndoId, record_data: &[u8], record_size: usize) {
        let begin = self.get(id).begin;
        let need_chunk_header = self.get(id).need_chunk_header;
        let need_type_header = self.get(id).need_type_header;
        let header_size = self.header_size(id);
        let chunk_idx = self.get(id).chunks.len() - 1;
        let chunk_header_offset = self.get(id).chunks[chunk_idx].header_offset;
        let needs_wal = self.get(id).persistence.needs_wal();

        if needs_wal {
            self.wal.begin_insert();
        }

        let mut cursor = begin;
        let mut fragment_input_offset = 0usize;

        if need_chunk_header {
            let rs_type = self.get(id).rs_type;
            // Only the very first chunk's header carries a type header
            // (spec.md §3); a chunk header written when rolling into a
            // new log mid-URS carries none, which is how `write_fragment`
            // tells a `CREATE` from an `ADD_CHUNK`.
            let type_header = if need_type_header {
                self.get(id).type_header.clone()
            } else {
                Vec::new()
            };
            let previous_chunk = if chunk_idx == 0 {
                UndoRecPtr::INVALID
            } else {
                self.get(id).chunks[chunk_idx - 1].header_offset
            };
            let chunk_header = ChunkHeader {
                size: 0,
                previous_chunk,
                rs_type,
            };
            let mut combined = Vec::with_capacity(SIZE_OF_CHUNK_HEADER + type_header.len());
            combined.extend_from_slice(&chunk_header.to_bytes());
            combined.extend_from_slice(&type_header);

            cursor = self.write_fragment(
                id,
                cursor,
                &mut fragment_input_offset,
                &combined,
                WriteKind::Header {
                    chunk_start: chunk_header_offset,
                    urs_type: rs_type,
                    type_header_for_create: &type_header,
                },
            );
            self.get_mut(id).chunks[chunk_idx].header_written = true;
        }

        if record_size > 0 {
            fragment_input_offset = 0;
            self.write_fragment(
                id,
                cursor,
                &mut fragment_input_offset,
                record_data,
                WriteKind::Record { chunk_start: chunk_header_offset },
            );
        }

        // Advance slot.insert under the (conceptual) metadata lock.
        let log = self.get(id).chunks[chunk_idx].log;
        let advanced = urs_common::plus_usable_bytes(begin.offset(), (header_size + record_size) as u64);
        self.allocator.set_meta_insert(log, advanced);

        if let Some(prev_idx) = self.get(id).closing_chunk_idx.take() {
            self.mark_chunk_closed(id, prev_idx, false);
        }

        if needs_wal {
            self.register_xlog_buffers_for_xact_level(&[id]);
            let lsn = self.wal.insert(RmgrId::Undo, Some(record_data));
            self.set_lsn_for_xact_level(&[id], lsn);
        }
        let buffers = self.buffers.clone();
        self.get_mut(id).release(buffers.as_ref());

        let urs = self.get_mut(id);
        urs.need_chunk_header = false;
        urs.need_type_header = false;
        urs.state = UndoState::Dirty;
    }

    /// Writes one logical fragment (header+type-header, or record data)
    /// across as many pinned pages as it spans, staging the bufdata the
    /// first touched buffer needs along the way (spec.md §4.4).
    fn write_fragment(
        &mut self,
        id: UndoId,
        mut cursor: UndoRecPtr,
        input_offset: &mut usize,
        data: &[u8],
        kind: WriteKind,
    ) -> UndoRecPtr {
        let log_number = cursor.log_number();
        let needs_wal = self.get(id).persistence.needs_wal();

        while *input_offset < data.len() {
            let blkno = cursor.block_number();
            let page_offset = cursor.page_offset();
            let log = self.get(id).slot.unwrap();
            let buf_idx = self
                .get_mut(id)
                .find_or_pin_buffer(self.buffers.as_ref(), log, log_number, blkno, false);
            let buf = self.get(id).buffers[buf_idx].buf;
            let needs_init = self.get(id).buffers[buf_idx].needs_init;
            let starts_new_page = page_offset == SIZE_OF_UNDO_PAGE_HEADER;
            let offset_before = *input_offset;

            let written = self.buffers.with_page(buf, |page| {
                if needs_init {
                    *page = urs_common::empty_page();
                    urs_common::UndoPageHeader::fresh().write(page);
                }
                match kind {
                    WriteKind::Header { chunk_start, .. } => {
                        let header_len = SIZE_OF_CHUNK_HEADER.min(data.len());
                        urs_pagestore::codec::insert_header(
                            page,
                            page_offset,
                            offset_before,
                            ChunkHeader::from_bytes(&data[0..header_len]),
                            &data[header_len..],
                            chunk_start,
                        )
                    }
                    WriteKind::Record { chunk_start } => {
                        urs_pagestore::codec::insert_record(page, page_offset, offset_before, data, chunk_start)
                    }
                }
            });
            self.buffers.mark_dirty(buf);
            self.get_mut(id).buffers[buf_idx].needs_init = false;

            if needs_wal {
                let urs = self.get_mut(id);
                if !urs.buffers[buf_idx].bufdata.has_insert() {
                    urs.buffers[buf_idx].bufdata.push(BufDataOp::Insert {
                        insert_page_offset: page_offset as u16,
                    });
                }
                if offset_before == 0 {
                    if let WriteKind::Header { urs_type, type_header_for_create, .. } = kind {
                        if !type_header_for_create.is_empty() {
                            urs.buffers[buf_idx].bufdata.push(BufDataOp::Create {
                                urs_type,
                                type_header: type_header_for_create.to_vec(),
                            });
                        } else {
                            let previous = urs.chunks[urs.chunks.len().saturating_sub(2)].header_offset;
                            urs.buffers[buf_idx].bufdata.push(BufDataOp::AddChunk {
                                urs_type,
                                previous_chunk_header_location: previous,
                            });
                        }
                    }
                }
                if starts_new_page {
                    let urs_type = urs.rs_type;
                    let chunk_header_location = urs.chunks.last().unwrap().header_offset;
                    urs.buffers[buf_idx].bufdata.push(BufDataOp::AddPage {
                        urs_type,
                        chunk_header_location,
                    });
                }
            }

            *input_offset += written;
            cursor = UndoRecPtr::new(log_number, urs_common::plus_usable_bytes(cursor.offset(), written as u64));
        }
        cursor
    }
}

#[derive(Clone, Copy)]
enum WriteKind<'a> {
    Header {
        chunk_start: UndoRecPtr,
        urs_type: urs_common::UndoRsType,
        type_header_for_create: &'a [u8],
    },
    Record {
        chunk_start: UndoRecPtr,
    },
}
