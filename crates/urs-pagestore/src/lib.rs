//! The page codec (spec.md §4.1) — the stateless read/write operations
//! on a single undo page — plus reference in-memory implementations of
//! the `BufferManager` and `UndoLogAllocator` traits for embedders
//! without a real storage manager, and for this workspace's own tests.

pub mod codec;
pub mod memory;

pub use codec::{insert_header, insert_record, overwrite, skip_header, skip_overwrite, skip_record};
pub use memory::{InMemoryBufferManager, InMemoryLogAllocator};
