//! The decoded shape of a WAL record, as the replay engine consumes it.
//! spec.md §1 calls this an external input ("decoded redo records with
//! an ordered list of registered blocks and their per-buffer data");
//! this is the concrete struct that shape takes in this workspace.

use urs_common::traits::RmgrId;
use urs_common::UndoLogNumber;

/// One block registered against a WAL record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedBlock {
    pub block_id: u8,
    pub log_number: UndoLogNumber,
    pub blkno: u64,
    /// `BKPBLOCK_WILL_INIT`: the page should be read zeroed rather than
    /// from disk.
    pub will_init: bool,
    /// `BLK_RESTORED`: a full-page image already put the correct bytes
    /// in place; redo must not touch the page but should still advance
    /// bookkeeping.
    pub restored_from_fpi: bool,
    /// `BLK_NOTFOUND`: the block has been discarded since the record was
    /// written; same "advance bookkeeping, skip the page" treatment as
    /// an FPI restore.
    pub not_found: bool,
    /// The raw `UndoRecordSetXLogBufData` bytes registered for this
    /// block (see `bufdata::BufData::decode`).
    pub buf_data: Vec<u8>,
}

impl DecodedBlock {
    /// Whether redo should skip writing to this block's page while
    /// still advancing the in-memory insertion cursor (spec.md §4.6 /
    /// Open Question 1).
    pub fn skip(&self) -> bool {
        self.restored_from_fpi || self.not_found
    }
}

/// One WAL record as replay sees it: the record manager/op that produced
/// it, its registered blocks in original staging order, and the
/// caller's undo-record payload, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedUndoRecord {
    pub lsn: u64,
    pub rmgr: RmgrId,
    pub blocks: Vec<DecodedBlock>,
    pub record_data: Option<Vec<u8>>,
}
