//! Collaborator traits standing in for the systems spec.md §1 calls out
//! of the core's scope: the undo log allocator, the buffer manager, the
//! WAL subsystem, and the type-specific layer. Each is deliberately
//! narrow — just the operations the core actually calls.

use crate::ptr::UndoRecPtr;
use crate::types::{Persistence, UndoLogNumber, UndoLogOffset, UndoRsType};
use crate::Page;

/// Mirrors `RBM_NORMAL` / `RBM_ZERO` / `RBM_ZERO_AND_LOCK`: how a page
/// should be materialized when it is pinned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadBufferMode {
    /// Read the existing page contents.
    Normal,
    /// The page is known to be beyond the log's current end; hand back
    /// a zeroed buffer instead of reading.
    Zero,
    /// Like `Zero`, but also take the exclusive lock as part of the same
    /// call (used by replay for `is_new` blocks).
    ZeroAndLock,
}

/// Owns physical extents, discard/insert cursors, and per-log metadata
/// locks for undo logs. The core calls this to acquire a log, extend its
/// physical range, mark it full or truncated, and release it.
pub trait UndoLogAllocator: Send + Sync {
    /// Opaque handle to one log slot.
    type Log: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync;

    /// Acquire a log with the given persistence class, creating one if
    /// none is available.
    fn get_log(&self, persistence: Persistence) -> Self::Log;

    fn log_number(&self, log: Self::Log) -> UndoLogNumber;

    fn find_by_number(&self, number: UndoLogNumber) -> Self::Log;

    /// Current insertion cursor, read under at least a shared hold of
    /// the log's metadata lock.
    fn meta_insert(&self, log: Self::Log) -> UndoLogOffset;

    /// Advance the insertion cursor. Callers must hold the metadata lock
    /// exclusively (spec.md §5: "`slot.insert` is only advanced while
    /// holding the log's metadata lock exclusively").
    fn set_meta_insert(&self, log: Self::Log, new_insert: UndoLogOffset);

    /// First un-discarded byte.
    fn meta_discard(&self, log: Self::Log) -> UndoLogOffset;

    /// Current physical end of the log (backed storage, not necessarily
    /// all "in use").
    fn end(&self, log: Self::Log) -> UndoLogOffset;

    /// Total addressable size of the log (`UndoLogMaxSize` ceiling).
    fn size(&self, log: Self::Log) -> UndoLogOffset;

    /// Whether this log slot has been externally marked for forced
    /// truncation (e.g. the allocator is reclaiming it).
    fn force_truncate(&self, log: Self::Log) -> bool;

    fn clear_force_truncate(&self, log: Self::Log);

    /// Extend the log's physical range to cover `new_end`.
    fn extend(&self, log: Self::Log, new_end: UndoLogOffset);

    /// Truncate and detach a log that can no longer satisfy a reservation.
    fn truncate(&self, log: Self::Log);

    /// Return a log slot to the allocator (called from `destroy`).
    fn put(&self, log: Self::Log);

    /// Visit every known log slot — used by the recovery sweep.
    fn for_each_log(&self, f: &mut dyn FnMut(Self::Log));
}

/// Pin/lock/dirty/LSN-stamp a page. The core acquires every pin for an
/// operation before taking any exclusive lock (the two-pass design in
/// spec.md §5), so `pin` and `lock_exclusive` are separate calls.
pub trait BufferManager: Send + Sync {
    type BufferRef: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync;

    /// Pin (but do not lock) the page at `(log, blkno)`.
    fn pin(&self, log: UndoLogNumber, blkno: u64, mode: ReadBufferMode) -> Self::BufferRef;

    fn lock_exclusive(&self, buf: Self::BufferRef);

    fn lock_shared(&self, buf: Self::BufferRef);

    /// Run `f` with mutable access to the page's bytes. Callers must
    /// already hold at least a shared lock.
    fn with_page<R>(&self, buf: Self::BufferRef, f: impl FnOnce(&mut Page) -> R) -> R;

    fn mark_dirty(&self, buf: Self::BufferRef);

    fn set_lsn(&self, buf: Self::BufferRef, lsn: u64);

    /// Unlock and release the pin.
    fn unlock_release(&self, buf: Self::BufferRef);

    fn log_of(&self, buf: Self::BufferRef) -> UndoLogNumber;

    fn block_of(&self, buf: Self::BufferRef) -> u64;
}

/// Which resource-manager / operation produced a WAL record, as far as
/// the replay engine's `CLOSE` handling needs to distinguish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RmgrId {
    /// Undo's own records (insert-only records, and the recovery sweep's
    /// NOOP closures).
    Undo,
    /// A transaction-manager record carrying a close piggybacked onto
    /// commit/abort/prepare.
    Xact(XactOp),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XactOp {
    Commit,
    CommitPrepared,
    Abort,
    AbortPrepared,
    Prepare,
}

impl XactOp {
    pub fn is_commit(self) -> bool {
        matches!(self, XactOp::Commit | XactOp::CommitPrepared)
    }

    pub fn is_prepare(self) -> bool {
        matches!(self, XactOp::Prepare)
    }
}

/// The WAL subsystem's critical-section insertion protocol:
/// `begin_insert` / `register_buffer` / `register_buffer_data` /
/// `insert`, plus the decoded-record shape (`urs_wal::DecodedUndoRecord`)
/// that replay consumes on the other side.
pub trait WalSink: Send + Sync {
    fn begin_insert(&self);

    /// Register the page at `(log, blkno)` as block `block_id` of the
    /// record under construction.
    fn register_buffer(&self, block_id: u8, log: UndoLogNumber, blkno: u64, will_init: bool);

    /// Attach opaque buffer-data bytes to an already-registered block.
    fn register_buffer_data(&self, block_id: u8, data: &[u8]);

    /// Finish the record and return its assigned LSN. `record_data` is
    /// the undo payload proper (`None` for pure bufdata records such as
    /// the recovery sweep's NOOP).
    fn insert(&self, rmgr: RmgrId, record_data: Option<&[u8]>) -> u64;
}

/// The type-specific layer (e.g. the transaction undo layer): supplies
/// the type-header payload and its size, and is notified when a record
/// set of its type closes.
pub trait TypeLayer: Send + Sync {
    fn type_header_size(&self, urs_type: UndoRsType) -> u8;

    /// Called once a record set of this type closes, with the type
    /// header bytes written at `create` time and the pointer range the
    /// set occupied. Per Open Question 2 (spec.md §9), this is only ever
    /// invoked after every byte of the closing chunk's `size` field has
    /// been durably written in memory — never mid straddle.
    fn on_close_record_set(
        &self,
        urs_type: UndoRsType,
        type_header: &[u8],
        begin: UndoRecPtr,
        end: UndoRecPtr,
        is_commit: bool,
        is_prepare: bool,
    );
}
