//! The in-memory `UndoRecordSet` (spec.md §3) and its buffer tracker
//! (spec.md §4.2): the array of pinned+locked pages held by the
//! in-progress operation, each carrying its own staged WAL bufdata.

use urs_common::traits::{BufferManager, ReadBufferMode};
use urs_common::{Persistence, UndoLogOffset, UndoRecPtr, UndoRsType};
use urs_wal::BufData;

use crate::chunk::Chunk;

/// `clean → dirty → closed`, per spec.md §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndoState {
    Clean,
    Dirty,
    Closed,
}

/// One pinned+locked page held by the current operation. `is_new` and
/// `needs_init` are named booleans rather than a bitfield (Design Note,
/// spec.md §9): the source's `buffer_flag` packs them for space, but
/// nothing downstream treats them as a contract.
pub struct UndoBuffer<BR> {
    pub buf: BR,
    pub is_new: bool,
    pub needs_init: bool,
    pub bufdata: BufData,
}

/// One open (or recently closed, pre-`destroy`) undo record set.
pub struct UndoRecordSet<L, BR> {
    pub rs_type: UndoRsType,
    pub persistence: Persistence,
    pub nesting_level: u32,
    pub chunks: Vec<Chunk<L>>,
    pub buffers: Vec<UndoBuffer<BR>>,
    pub state: UndoState,

    // Planning scratch (spec.md §3).
    pub need_chunk_header: bool,
    pub need_type_header: bool,
    pub type_header: Vec<u8>,
    pub begin: UndoRecPtr,

    pub slot: Option<L>,
    pub recent_end: UndoLogOffset,

    /// Set by `prepare_to_insert` when the previous chunk was scheduled
    /// for closure as part of this operation's rollover; consumed by
    /// `insert` once the new chunk's bytes are down.
    pub closing_chunk_idx: Option<usize>,
}

impl<L: Copy + Eq, BR: Copy + Eq> UndoRecordSet<L, BR> {
    pub fn new(rs_type: UndoRsType, persistence: Persistence, nesting_level: u32) -> Self {
        Self::with_capacity(rs_type, persistence, nesting_level, 0)
    }

    /// `initial_buffer_capacity` (`UndoConfig`): how many buffer-tracker
    /// slots to reserve up front, covering the common case of a small
    /// record plus its header without reallocating.
    pub fn with_capacity(rs_type: UndoRsType, persistence: Persistence, nesting_level: u32, initial_buffer_capacity: usize) -> Self {
        UndoRecordSet {
            rs_type,
            persistence,
            nesting_level,
            chunks: Vec::new(),
            buffers: Vec::with_capacity(initial_buffer_capacity),
            state: UndoState::Clean,
            need_chunk_header: true,
            need_type_header: true,
            type_header: Vec::new(),
            begin: UndoRecPtr::INVALID,
            slot: None,
            recent_end: 0,
            closing_chunk_idx: None,
        }
    }

    /// spec.md §4.2: linear scan for an already-pinned buffer covering
    /// `(log, blkno)`; on miss, pin (and, for a freshly extended page,
    /// zero) a new one and append it. Locking happens in a later,
    /// separate pass (spec.md §5's two-pass ordering guarantee) via
    /// `lock_all_pinned`.
    pub fn find_or_pin_buffer<B: BufferManager<BufferRef = BR>>(
        &mut self,
        buffers: &B,
        log: L,
        log_number: urs_common::UndoLogNumber,
        blkno: u64,
        is_new: bool,
    ) -> usize {
        for (idx, b) in self.buffers.iter().enumerate() {
            if buffers.log_of(b.buf) == log_number && buffers.block_of(b.buf) == blkno {
                return idx;
            }
        }
        let mode = if is_new {
            ReadBufferMode::Zero
        } else {
            ReadBufferMode::Normal
        };
        let buf = buffers.pin(log_number, blkno, mode);
        let _ = log;
        self.buffers.push(UndoBuffer {
            buf,
            is_new,
            needs_init: is_new,
            bufdata: BufData::new(),
        });
        self.buffers.len() - 1
    }

    /// Lock every buffer currently held by this operation, exclusively.
    /// Always called after every pin for the operation has already
    /// happened — never interleaved with pinning.
    pub fn lock_all_pinned<B: BufferManager<BufferRef = BR>>(&self, buffers: &B) {
        for b in &self.buffers {
            buffers.lock_exclusive(b.buf);
        }
    }

    /// Unlock and release every buffer, clearing the tracker for the
    /// next operation. Chunk bookkeeping (the `chunks` list) survives.
    pub fn release<B: BufferManager<BufferRef = BR>>(&mut self, buffers: &B) {
        for b in self.buffers.drain(..) {
            buffers.unlock_release(b.buf);
        }
    }
}
