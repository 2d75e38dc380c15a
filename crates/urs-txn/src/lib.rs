//! The TRANSACTION type layer: the one external collaborator spec.md §1
//! names by example, supplying the xid type-header for transaction undo
//! record sets and reacting once one closes.
//!
//! Grounded on the teacher's `compute::transaction::MiniTransaction`,
//! which collects writes under one mtr id and treats the last write in
//! the group as its durability point; here the "group" is a URS and its
//! durability point is the commit/abort `on_close_record_set` call.

pub mod transaction;

pub use transaction::TransactionTypeLayer;
