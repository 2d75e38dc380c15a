//! The WAL buffer-data schema (`UndoRecordSetXLogBufData`, spec.md §6)
//! and a minimal critical-section driver implementing the
//! `begin_insert` / `register_buffer` / `register_buffer_data` /
//! `insert` protocol spec.md §1 calls an external collaborator.
//!
//! `bufdata` and `decoded` are pure data + codec, usable against any WAL
//! implementation; `sink` supplies two reference drivers
//! (`InMemoryWalSink`, `FileWalSink`) for embedders and for this
//! workspace's own tests.

pub mod bufdata;
pub mod decoded;
pub mod sink;

pub use bufdata::{BufData, BufDataOp};
pub use decoded::{DecodedBlock, DecodedUndoRecord};
pub use sink::{FileWalSink, InMemoryWalSink};
