//! The replay engine (spec.md §4.6): one call per original WAL record,
//! reconstructing page state entirely from registered blocks' bufdata —
//! the in-memory `UndoRecordSet`/`Chunk` bookkeeping this crate uses at
//! insert time plays no part here, since replay has no live record set
//! to consult, only what the record itself carries.

use urs_common::traits::{BufferManager, ReadBufferMode, RmgrId, TypeLayer, UndoLogAllocator, WalSink};
use urs_common::{
    ChunkHeader, UndoError, UndoPageHeader, UndoRecPtr, UndoResult, UndoRsType, BLCKSZ,
    SIZE_OF_UNDO_PAGE_HEADER,
};
use urs_wal::{BufData, BufDataOp, DecodedBlock, DecodedUndoRecord};

use crate::context::UndoContext;

/// Everything `on_close_record_set` needs, computed as soon as the
/// `CLOSE` bufdata is seen but not invoked until the chunk's `size`
/// field has been durably written in full — it may still be straddling
/// a page boundary at that point (`TypeLayer::on_close_record_set`'s
/// contract; matches `recovery.rs`'s dangling-chunk ordering).
struct PendingClose {
    urs_type: UndoRsType,
    type_header: Vec<u8>,
    begin: UndoRecPtr,
    end: UndoRecPtr,
    is_commit: bool,
    is_prepare: bool,
}

/// Tracks a write that overflowed the page it started on and must
/// resume at `SizeOfUndoPageHeader` on the next registered block.
enum CarryOver {
    ChunkSize { remaining: Vec<u8>, written: usize, pending_close: Option<PendingClose> },
    Header { remaining: Vec<u8>, written: usize },
}

impl<A, B, W, T> UndoContext<A, B, W, T>
where
    A: UndoLogAllocator,
    B: BufferManager,
    W: WalSink,
    T: TypeLayer,
{
    /// `replay(decoded_record, record_data, record_size)` (spec.md §4.6).
    pub fn replay(&mut self, record: &DecodedUndoRecord) -> UndoResult<()> {
        let mut carry: Option<CarryOver> = None;
        let mut record_cursor = 0usize;
        let record_data = record.record_data.as_deref().unwrap_or(&[]);

        let mut touched: Vec<(B::BufferRef, bool)> = Vec::new();

        for block in &record.blocks {
            let skip = block.skip();
            let log = self.allocator.find_by_number(block.log_number);
            let page_end = (block.blkno + 1) * BLCKSZ as u64;
            if self.allocator.end(log) < page_end {
                self.allocator.extend(log, page_end);
            }

            let mode = if block.will_init {
                ReadBufferMode::ZeroAndLock
            } else {
                ReadBufferMode::Normal
            };
            let buf = self.buffers.pin(block.log_number, block.blkno, mode);
            if !block.will_init {
                self.buffers.lock_exclusive(buf);
            }
            touched.push((buf, skip));

            let bufdata = if block.buf_data.is_empty() {
                BufData::new()
            } else {
                BufData::decode(&block.buf_data).map_err(|_| UndoError::Corruption {
                    log: block.log_number,
                    reason: "undecodable UndoRecordSetXLogBufData".into(),
                })?
            };

            if let Some(c) = carry.take() {
                let done = self.resume_carry_over(buf, skip, c, &bufdata)?;
                if let Some(still) = done {
                    carry = Some(still);
                    continue;
                }
            }

            if !skip {
                if let Some(BufDataOp::Insert { insert_page_offset }) =
                    bufdata.ops.iter().find(|o| matches!(o, BufDataOp::Insert { .. }))
                {
                    self.buffers.with_page(buf, |page| {
                        let mut hdr = UndoPageHeader::read(page);
                        hdr.insertion_point = *insert_page_offset;
                        hdr.write(page);
                    });
                }
            }

            // CREATE / ADD_CHUNK (mutually exclusive): lay down the
            // chunk header (and, for CREATE, the type header).
            if let Some(next) = self.write_header_bufdata(buf, skip, &bufdata)? {
                carry = Some(next);
                continue;
            }

            // Caller record insertion, if this WAL record carries one
            // and we have not already placed all of it. Progress lives
            // in `record_cursor` itself (mutated in place), not in
            // `carry` — unlike the header/chunk-size writes, a spilled
            // record write is fully described by how far `record_cursor`
            // got, so the next block's iteration of this same check
            // picks it back up with no separate carry-over state.
            if record_cursor < record_data.len() {
                let spilled = self.write_record_bufdata(buf, skip, &bufdata, record_data, &mut record_cursor)?;
                if spilled {
                    continue;
                }
            }

            // CLOSE_CHUNK / CLOSE.
            if let Some(next) = self.write_close_bufdata(buf, skip, block, record.rmgr, &bufdata)? {
                carry = Some(next);
                continue;
            }
        }

        if carry.is_some() {
            return Err(UndoError::ReplayRanOutOfBlocks);
        }

        for (buf, skip) in touched {
            if !skip {
                self.buffers.mark_dirty(buf);
            }
            self.buffers.set_lsn(buf, record.lsn);
            self.buffers.unlock_release(buf);
        }
        Ok(())
    }

    fn current_insertion_point(&self, buf: B::BufferRef) -> usize {
        self.buffers.with_page(buf, |page| UndoPageHeader::read(page).insertion_point as usize)
    }

    fn resume_carry_over(
        &mut self,
        buf: B::BufferRef,
        skip: bool,
        carry: CarryOver,
        bufdata: &BufData,
    ) -> UndoResult<Option<CarryOver>> {
        match carry {
            CarryOver::ChunkSize { remaining, written, pending_close } => {
                let n = if skip {
                    remaining.len() - written
                } else {
                    self.buffers.with_page(buf, |page| {
                        urs_pagestore::codec::overwrite(page, SIZE_OF_UNDO_PAGE_HEADER, written, &remaining)
                    })
                };
                if written + n >= remaining.len() {
                    if let Some(pending) = pending_close {
                        self.invoke_close_callback(pending)?;
                    }
                    Ok(None)
                } else {
                    Ok(Some(CarryOver::ChunkSize { remaining, written: written + n, pending_close }))
                }
            }
            CarryOver::Header { remaining, written } => {
                let chunk_header = ChunkHeader::from_bytes(&remaining[0..urs_common::SIZE_OF_CHUNK_HEADER]);
                let type_header = &remaining[urs_common::SIZE_OF_CHUNK_HEADER..];
                let chunk_start = bufdata.add_page().unwrap_or(UndoRecPtr::INVALID);
                let n = if skip {
                    remaining.len() - written
                } else {
                    self.buffers.with_page(buf, |page| {
                        urs_pagestore::codec::insert_header(
                            page,
                            SIZE_OF_UNDO_PAGE_HEADER,
                            written,
                            chunk_header,
                            type_header,
                            chunk_start,
                        )
                    })
                };
                if written + n >= remaining.len() {
                    Ok(None)
                } else {
                    Ok(Some(CarryOver::Header { remaining, written: written + n }))
                }
            }
        }
    }

    fn write_header_bufdata(
        &mut self,
        buf: B::BufferRef,
        skip: bool,
        bufdata: &BufData,
    ) -> UndoResult<Option<CarryOver>> {
        let (rs_type, type_header, previous_chunk) = if let Some((t, h)) = {
            bufdata.ops.iter().find_map(|o| match o {
                BufDataOp::Create { urs_type, type_header } => Some((*urs_type, type_header.clone())),
                _ => None,
            })
        } {
            (t, h, UndoRecPtr::INVALID)
        } else if let Some((t, prev)) = bufdata.ops.iter().find_map(|o| match o {
            BufDataOp::AddChunk {
                urs_type,
                previous_chunk_header_location,
            } => Some((*urs_type, *previous_chunk_header_location)),
            _ => None,
        }) {
            (t, Vec::new(), prev)
        } else {
            return Ok(None);
        };

        let chunk_header = ChunkHeader {
            size: 0,
            previous_chunk,
            rs_type,
        };
        let mut combined = chunk_header.to_bytes().to_vec();
        combined.extend_from_slice(&type_header);

        // A new chunk's header always starts wherever this page's data
        // currently ends (the `Insert` bufdata op, handled just above
        // in `replay`, has already set `insertion_point` to that spot) —
        // not necessarily at `SIZE_OF_UNDO_PAGE_HEADER`, since this page
        // may already hold the tail of an earlier, unrelated chunk.
        // Reading it is safe even when `skip` is set: the page's header
        // still reflects reality, only its body is left untouched here.
        let page_offset = self.current_insertion_point(buf);
        let n = if skip {
            combined.len().min(BLCKSZ - page_offset)
        } else {
            self.buffers.with_page(buf, |page| {
                urs_pagestore::codec::insert_header(page, page_offset, 0, chunk_header, &type_header, UndoRecPtr::INVALID)
            })
        };
        if n < combined.len() {
            Ok(Some(CarryOver::Header { remaining: combined, written: n }))
        } else {
            Ok(None)
        }
    }

    /// Writes as much of `record_data[*cursor..]` as fits on `buf`,
    /// continuing from wherever this page's data currently ends (set
    /// either by this block's `Insert` bufdata op or by a header write
    /// that just landed on the same page). Returns whether bytes remain
    /// for a later block.
    fn write_record_bufdata(
        &mut self,
        buf: B::BufferRef,
        skip: bool,
        bufdata: &BufData,
        record_data: &[u8],
        cursor: &mut usize,
    ) -> UndoResult<bool> {
        let page_offset = self.current_insertion_point(buf);
        let chunk_start = bufdata.add_page().unwrap_or(UndoRecPtr::INVALID);
        let n = if skip {
            (record_data.len() - *cursor).min(BLCKSZ - page_offset)
        } else {
            self.buffers.with_page(buf, |page| {
                urs_pagestore::codec::insert_record(page, page_offset, *cursor, record_data, chunk_start)
            })
        };
        *cursor += n;
        Ok(*cursor < record_data.len())
    }

    fn invoke_close_callback(&mut self, pending: PendingClose) -> UndoResult<()> {
        self.type_layer.on_close_record_set(
            pending.urs_type,
            &pending.type_header,
            pending.begin,
            pending.end,
            pending.is_commit,
            pending.is_prepare,
        );
        Ok(())
    }

    fn write_close_bufdata(
        &mut self,
        buf: B::BufferRef,
        skip: bool,
        block: &DecodedBlock,
        rmgr: RmgrId,
        bufdata: &BufData,
    ) -> UndoResult<Option<CarryOver>> {
        let (page_offset, chunk_size) = match bufdata.close_chunk() {
            Some(v) => v,
            None => return Ok(None),
        };
        let size_bytes = ChunkHeader::size_bytes(chunk_size);
        let n = if skip {
            size_bytes.len().min(BLCKSZ - page_offset as usize)
        } else {
            self.buffers
                .with_page(buf, |page| urs_pagestore::codec::overwrite(page, page_offset as usize, 0, &size_bytes))
        };

        let pending_close = if let Some((urs_type, type_header)) = bufdata.close() {
            if urs_type != UndoRsType::TRANSACTION {
                return Err(UndoError::UnrecognizedCloseOp);
            }
            let first_chunk = bufdata.close_multi_chunk();
            let begin = first_chunk.unwrap_or_else(|| {
                UndoRecPtr::new(block.log_number, block.blkno * BLCKSZ as u64 + page_offset as u64)
            });
            let insertion_point = self.buffers.with_page(buf, |page| UndoPageHeader::read(page).insertion_point);
            let end = UndoRecPtr::new(block.log_number, block.blkno * BLCKSZ as u64 + insertion_point as u64);
            let (is_commit, is_prepare) = match rmgr {
                RmgrId::Xact(op) => (op.is_commit(), op.is_prepare()),
                RmgrId::Undo => (false, false),
            };
            Some(PendingClose {
                urs_type,
                type_header: type_header.to_vec(),
                begin,
                end,
                is_commit,
                is_prepare,
            })
        } else {
            None
        };

        if n < size_bytes.len() {
            Ok(Some(CarryOver::ChunkSize { remaining: size_bytes.to_vec(), written: n, pending_close }))
        } else {
            if let Some(pending) = pending_close {
                self.invoke_close_callback(pending)?;
            }
            Ok(None)
        }
    }
}
