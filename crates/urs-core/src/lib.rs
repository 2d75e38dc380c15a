//! The undo record set (URS) manager (spec.md §4): the chunk/page
//! layout, the buffer-pin/lock orchestration protocol, the insertion
//! planner, the close protocol, the replay engine, the crash-recovery
//! sweep, and the transaction-nesting façade, all assembled around one
//! `UndoContext` per worker.
//!
//! Each piece lives in its own module, named after the operation it
//! implements rather than after a layer, matching how `undorecordset.c`
//! groups its functions:
//!
//! - [`chunk`] — `Chunk`, the per-log bookkeeping entry for one segment
//!   of a record set.
//! - [`record_set`] — `UndoRecordSet`, `UndoBuffer`, the buffer tracker.
//! - [`context`] — `UndoContext`, the per-worker registry `create` and
//!   `destroy` operate against.
//! - [`planner`] — `prepare_to_insert` / `insert`.
//! - [`close`] — `prepare_to_mark_closed` / `mark_closed` /
//!   `mark_chunk_closed`.
//! - [`replay`] — `replay`.
//! - [`recovery`] — `close_dangling_record_sets`.
//! - [`xact`] — the `*_for_xact_level` façade.
//! - [`config`] — `UndoConfig`, the buffers-per-operation hint and
//!   other knobs callers tune per worker.

pub mod chunk;
pub mod close;
pub mod config;
pub mod context;
pub mod planner;
pub mod record_set;
pub mod recovery;
pub mod replay;
pub mod xact;

pub use chunk::Chunk;
pub use config::UndoConfig;
pub use context::{UndoContext, UndoId};
pub use record_set::{UndoBuffer, UndoRecordSet, UndoState};
