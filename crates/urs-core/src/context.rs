//! `UndoContext`: the per-worker owned registry of open record sets
//! (Design Note, spec.md §9 — explicitly *not* a process-wide static,
//! unlike the source's intrusive list) plus the collaborators every
//! operation needs. Grounded on
//! `mini_aurora_compute::engine::ComputeEngine`'s shape: one struct
//! owning its mutable state and a handle to the systems below it.

use std::sync::Arc;

use urs_common::error::UndoPanic;
use urs_common::traits::{BufferManager, TypeLayer, UndoLogAllocator, WalSink};
use urs_common::{Persistence, UndoRsType};

use crate::config::UndoConfig;
use crate::record_set::UndoRecordSet;

/// A handle to one entry in an `UndoContext`'s registry. Stable for the
/// lifetime of the record set; invalidated by `destroy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UndoId(pub(crate) usize);

pub struct UndoContext<A: UndoLogAllocator, B: BufferManager, W: WalSink, T: TypeLayer> {
    pub(crate) allocator: Arc<A>,
    pub(crate) buffers: Arc<B>,
    pub(crate) wal: Arc<W>,
    pub(crate) type_layer: Arc<T>,
    pub(crate) config: UndoConfig,
    pub(crate) registry: Vec<Option<UndoRecordSet<A::Log, B::BufferRef>>>,
}

impl<A, B, W, T> UndoContext<A, B, W, T>
where
    A: UndoLogAllocator,
    B: BufferManager,
    W: WalSink,
    T: TypeLayer,
{
    pub fn new(allocator: Arc<A>, buffers: Arc<B>, wal: Arc<W>, type_layer: Arc<T>) -> Self {
        Self::with_config(allocator, buffers, wal, type_layer, UndoConfig::default())
    }

    pub fn with_config(
        allocator: Arc<A>,
        buffers: Arc<B>,
        wal: Arc<W>,
        type_layer: Arc<T>,
        config: UndoConfig,
    ) -> Self {
        UndoContext {
            allocator,
            buffers,
            wal,
            type_layer,
            config,
            registry: Vec::new(),
        }
    }

    /// `create` (spec.md §3): a new URS enters `clean`, registered in
    /// this context. `type_header` is the opaque payload the type layer
    /// wants stored alongside the first chunk (e.g. the owning
    /// transaction's xid) — its length must match
    /// `TypeLayer::type_header_size(rs_type)`.
    pub fn create(
        &mut self,
        rs_type: UndoRsType,
        persistence: Persistence,
        nesting_level: u32,
        type_header: Vec<u8>,
    ) -> UndoId {
        assert_eq!(
            type_header.len(),
            self.type_layer.type_header_size(rs_type) as usize,
            "type_header length does not match the registered type layer's type_header_size"
        );
        let mut urs = UndoRecordSet::with_capacity(
            rs_type,
            persistence,
            nesting_level,
            self.config.initial_buffer_capacity,
        );
        urs.type_header = type_header;
        self.registry.push(Some(urs));
        UndoId(self.registry.len() - 1)
    }

    pub(crate) fn get(&self, id: UndoId) -> &UndoRecordSet<A::Log, B::BufferRef> {
        self.registry[id.0]
            .as_ref()
            .unwrap_or_else(|| UndoPanic::new("operation on a destroyed UndoId").abort())
    }

    pub(crate) fn get_mut(&mut self, id: UndoId) -> &mut UndoRecordSet<A::Log, B::BufferRef> {
        self.registry[id.0]
            .as_mut()
            .unwrap_or_else(|| UndoPanic::new("operation on a destroyed UndoId").abort())
    }

    /// `destroy` (spec.md §3): asserts `clean` or `closed` (I1), returns
    /// every chunk's log to the allocator (I5/P6), and removes the URS
    /// from the registry.
    pub fn destroy(&mut self, id: UndoId) {
        let urs = self.registry[id.0].take().unwrap_or_else(|| {
            UndoPanic::new("destroy called on an already-destroyed UndoId").abort()
        });
        if !matches!(urs.state, crate::record_set::UndoState::Clean | crate::record_set::UndoState::Closed) {
            UndoPanic::new("destroyed a dirty undo record set without closing it").abort();
        }
        let mut seen = std::collections::HashSet::new();
        for chunk in &urs.chunks {
            let number = self.allocator.log_number(chunk.log);
            if seen.insert(number) {
                self.allocator.put(chunk.log);
            }
        }
    }

    /// I5 / `at_proc_exit`: panics if any URS in this context is still
    /// open. Callers invoke this at worker shutdown.
    pub fn at_proc_exit(&self) {
        if self.registry.iter().any(Option::is_some) {
            UndoPanic::new("worker shut down with undo record sets still open").abort();
        }
    }

    /// `reset_insertion` (spec.md §4.8): on abort, drop every open
    /// URS's pinned buffers. Locks were already released by the abort
    /// unwind, so this is pure bookkeeping.
    pub fn reset_insertion(&mut self) {
        for slot in self.registry.iter_mut().flatten() {
            slot.buffers.clear();
            slot.closing_chunk_idx = None;
            slot.need_chunk_header = slot.chunks.is_empty() || !slot.chunks.last().unwrap().header_written;
            // The type header only ever rides on the first chunk. A chunk
            // left over from an aborted `prepare_to_insert` that never
            // reached `insert` still has `header_written == false`, so
            // its type header was never actually written either — not
            // just "chunks is empty" (spec.md §4.3 step 4's rule: cleared
            // only by a successful first insert).
            slot.need_type_header =
                slot.chunks.is_empty() || (slot.chunks.len() == 1 && !slot.chunks[0].header_written);
        }
    }
}
