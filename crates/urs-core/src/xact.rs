//! The transaction-level façade (spec.md §4.8): operations that sweep
//! every open record set at or below a given nesting level, used by the
//! owning transaction manager on commit/abort/subtransaction pop instead
//! of addressing individual `UndoId`s.

use urs_common::traits::{BufferManager, RmgrId, TypeLayer, UndoLogAllocator, WalSink, XactOp};
use urs_common::UndoRecPtr;

use crate::context::{UndoContext, UndoId};
use crate::record_set::UndoState;

impl<A, B, W, T> UndoContext<A, B, W, T>
where
    A: UndoLogAllocator,
    B: BufferManager,
    W: WalSink,
    T: TypeLayer,
{
    fn ids_at_or_below(&self, nesting_level: u32) -> Vec<UndoId> {
        self.registry
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref()
                    .filter(|urs| urs.nesting_level >= nesting_level && urs.state == UndoState::Dirty)
                    .map(|_| UndoId(idx))
            })
            .collect()
    }

    /// `prepare_to_mark_closed_for_xact_level`: pins every affected
    /// URS's active chunk size field; returns whether there is any work
    /// to do at all.
    pub fn prepare_to_mark_closed_for_xact_level(&mut self, nesting_level: u32) -> Vec<UndoId> {
        let ids = self.ids_at_or_below(nesting_level);
        let mut affected = Vec::new();
        for id in ids {
            if self.prepare_to_mark_closed(id) {
                affected.push(id);
            }
        }
        affected
    }

    pub fn mark_closed_for_xact_level(&mut self, ids: &[UndoId]) {
        for &id in ids {
            self.mark_closed(id);
        }
    }

    /// Register every pinned buffer (and its staged bufdata) of each
    /// affected URS with the WAL sink's in-progress record.
    pub fn register_xlog_buffers_for_xact_level(&mut self, ids: &[UndoId]) {
        for &id in ids {
            let urs = self.get(id);
            for (block_id, buffer) in urs.buffers.iter().enumerate() {
                let log_number = self.buffers.log_of(buffer.buf);
                let blkno = self.buffers.block_of(buffer.buf);
                self.wal
                    .register_buffer(block_id as u8, log_number, blkno, buffer.is_new);
                if !buffer.bufdata.ops.is_empty() {
                    self.wal
                        .register_buffer_data(block_id as u8, &buffer.bufdata.encode());
                }
            }
        }
    }

    pub fn set_lsn_for_xact_level(&mut self, ids: &[UndoId], lsn: u64) {
        for &id in ids {
            let urs = self.get(id);
            for buffer in &urs.buffers {
                self.buffers.set_lsn(buffer.buf, lsn);
            }
        }
    }

    /// `destroy_for_xact_level`: release locks for every affected URS
    /// first, then delete — collect-then-act rather than restarting
    /// iteration mid-mutation (Design Note, spec.md §9).
    pub fn destroy_for_xact_level(&mut self, nesting_level: u32) {
        let ids: Vec<UndoId> = self
            .registry
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref()
                    .filter(|urs| urs.nesting_level >= nesting_level)
                    .map(|_| UndoId(idx))
            })
            .collect();
        let buffers = self.buffers.clone();
        for &id in &ids {
            self.get_mut(id).release(buffers.as_ref());
        }
        for id in ids {
            self.destroy(id);
        }
    }

    /// `close_and_destroy_for_xact_level` (spec.md §4.8): the full
    /// commit/abort hook. `xact_op` drives the rmgr tag on the emitted
    /// WAL record; pass `None` for a plain Undo-rmgr NOOP (the recovery
    /// sweep's case).
    pub fn close_and_destroy_for_xact_level(&mut self, nesting_level: u32, xact_op: Option<XactOp>) {
        let affected = self.prepare_to_mark_closed_for_xact_level(nesting_level);
        if affected.is_empty() {
            self.destroy_for_xact_level(nesting_level);
            return;
        }

        self.wal.begin_insert();
        self.mark_closed_for_xact_level(&affected);
        self.register_xlog_buffers_for_xact_level(&affected);
        let rmgr = match xact_op {
            Some(op) => RmgrId::Xact(op),
            None => RmgrId::Undo,
        };
        let lsn = self.wal.insert(rmgr, None);
        self.set_lsn_for_xact_level(&affected, lsn);

        for &id in &affected {
            let urs = self.get(id);
            if urs.rs_type == urs_common::UndoRsType::TRANSACTION {
                // The record set's true start is its first chunk's header,
                // not `urs.begin` (which is per-operation planning scratch
                // last set by whichever `prepare_to_insert` happened most
                // recently, per spec.md §3).
                let begin = urs.chunks[0].header_offset;
                let end = self.record_set_end(id);
                let is_commit = xact_op.map(|op| op.is_commit()).unwrap_or(false);
                let is_prepare = xact_op.map(|op| op.is_prepare()).unwrap_or(false);
                self.type_layer
                    .on_close_record_set(urs.rs_type, &urs.type_header, begin, end, is_commit, is_prepare);
            }
        }

        let buffers = self.buffers.clone();
        for &id in &affected {
            self.get_mut(id).release(buffers.as_ref());
        }
        self.destroy_for_xact_level(nesting_level);
    }

    /// The pointer one past the last byte of the closed record set:
    /// the active chunk's own `slot.insert` at close time.
    fn record_set_end(&self, id: UndoId) -> UndoRecPtr {
        let urs = self.get(id);
        let chunk = urs.chunks.last().expect("closed URS always has at least one chunk");
        let log_number = chunk.header_offset.log_number();
        UndoRecPtr::new(log_number, self.allocator.meta_insert(chunk.log))
    }
}
