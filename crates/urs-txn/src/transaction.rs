use std::sync::Mutex;

use urs_common::traits::TypeLayer;
use urs_common::{UndoRecPtr, UndoRsType};

/// One closed TRANSACTION record set, as handed to
/// [`TransactionTypeLayer::on_close_record_set`]. Kept around so a
/// transaction manager built on top of this crate can drain closures
/// without having to thread its own channel through the callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClosedTransaction {
    pub xid: u64,
    pub begin: UndoRecPtr,
    pub end: UndoRecPtr,
    pub is_commit: bool,
    pub is_prepare: bool,
}

/// The `TRANSACTION` URS type: an 8-byte xid type-header, and a callback
/// that records where each transaction's undo ran once it closes.
///
/// Grounded on the teacher's `MiniTransaction`, which tags every write
/// in a group with one `mtr_id` and marks the last write as the group's
/// consistency point (CPL) — here the xid plays the role of `mtr_id`,
/// and `on_close_record_set`'s `end` pointer plays the role of the CPL.
pub struct TransactionTypeLayer {
    closed: Mutex<Vec<ClosedTransaction>>,
}

impl TransactionTypeLayer {
    pub fn new() -> Self {
        TransactionTypeLayer {
            closed: Mutex::new(Vec::new()),
        }
    }

    /// Type-header bytes for a transaction's undo record set: its xid,
    /// little-endian.
    pub fn type_header_for(xid: u64) -> [u8; 8] {
        xid.to_le_bytes()
    }

    /// Drains every transaction closure observed since the last drain.
    pub fn take_closed(&self) -> Vec<ClosedTransaction> {
        std::mem::take(&mut self.closed.lock().expect("lock poisoned"))
    }
}

impl Default for TransactionTypeLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeLayer for TransactionTypeLayer {
    fn type_header_size(&self, urs_type: UndoRsType) -> u8 {
        match urs_type {
            UndoRsType::TRANSACTION => 8,
            other => panic!("no type-header registered for undo record set type {}", other.0),
        }
    }

    fn on_close_record_set(
        &self,
        urs_type: UndoRsType,
        type_header: &[u8],
        begin: UndoRecPtr,
        end: UndoRecPtr,
        is_commit: bool,
        is_prepare: bool,
    ) {
        if urs_type != UndoRsType::TRANSACTION {
            return;
        }
        let xid = u64::from_le_bytes(type_header.try_into().expect("8-byte xid type header"));
        self.closed.lock().expect("lock poisoned").push(ClosedTransaction {
            xid,
            begin,
            end,
            is_commit,
            is_prepare,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_header_size_is_eight_bytes_for_transaction() {
        let layer = TransactionTypeLayer::new();
        assert_eq!(layer.type_header_size(UndoRsType::TRANSACTION), 8);
    }

    #[test]
    #[should_panic]
    fn type_header_size_panics_for_unregistered_type() {
        let layer = TransactionTypeLayer::new();
        layer.type_header_size(UndoRsType(99));
    }

    #[test]
    fn on_close_record_set_records_the_closure() {
        let layer = TransactionTypeLayer::new();
        let header = TransactionTypeLayer::type_header_for(42);
        let begin = UndoRecPtr::new(1, 100);
        let end = UndoRecPtr::new(1, 200);
        layer.on_close_record_set(UndoRsType::TRANSACTION, &header, begin, end, true, false);

        let closed = layer.take_closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].xid, 42);
        assert_eq!(closed[0].begin, begin);
        assert_eq!(closed[0].end, end);
        assert!(closed[0].is_commit);
        assert!(!closed[0].is_prepare);

        // draining clears it
        assert!(layer.take_closed().is_empty());
    }

    #[test]
    fn on_close_record_set_ignores_other_types() {
        let layer = TransactionTypeLayer::new();
        layer.on_close_record_set(UndoRsType(2), &[0; 8], UndoRecPtr::new(1, 0), UndoRecPtr::new(1, 8), true, false);
        assert!(layer.take_closed().is_empty());
    }
}
