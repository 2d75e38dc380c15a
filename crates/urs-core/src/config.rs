//! Per-worker tuning knobs. Page size itself is fixed at compile time
//! (`urs_common::BLCKSZ`, spec.md §3) and is not configurable here —
//! only the hints that shape how a `UndoContext` sizes its own scratch
//! structures, grounded on the shape of the teacher's
//! `storage::config::{StoragePreset, TieredConfig}` (one small plain
//! struct of knobs, no behavior of its own).

/// Tuning knobs for one `UndoContext`.
#[derive(Clone, Copy, Debug)]
pub struct UndoConfig {
    /// Initial capacity reserved for a record set's buffer tracker
    /// (spec.md §4.2's `reserve_array`); grown by doubling past this if
    /// an operation needs more. Picked to cover the common case of a
    /// small record plus its header without reallocating.
    pub initial_buffer_capacity: usize,
    /// Expected number of undo logs a worker's allocator will juggle at
    /// once, used only to size the `Vec` the recovery sweep collects
    /// log handles into before walking them.
    pub expected_log_count: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        UndoConfig {
            initial_buffer_capacity: 4,
            expected_log_count: 16,
        }
    }
}
