//! Reference, in-memory implementations of `BufferManager` and
//! `UndoLogAllocator`. Grounded on
//! `mini_aurora_storage::engine::StorageEngine`'s `Mutex<Inner>` over a
//! `HashMap` — authoritative storage behind one lock, not an eviction
//! cache (see DESIGN.md's note on why `moka` was dropped for this
//! crate).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use urs_common::traits::{BufferManager, ReadBufferMode, UndoLogAllocator};
use urs_common::{empty_page, Page, Persistence, UndoLogNumber, UndoLogOffset, UNDO_LOG_MAX_SIZE};

/// One undo log's allocator-owned metadata.
struct LogMeta {
    persistence: Persistence,
    insert: UndoLogOffset,
    discard: UndoLogOffset,
    end: UndoLogOffset,
    size: UndoLogOffset,
    force_truncate: bool,
}

struct AllocatorInner {
    logs: HashMap<UndoLogNumber, LogMeta>,
    free: HashMap<Persistence, Vec<UndoLogNumber>>,
    next: UndoLogNumber,
}

/// A reference `UndoLogAllocator`: every log lives entirely in memory.
/// A fresh log's insertion cursor sits right past where its first page's
/// header will go, but `end` starts at zero — nothing is considered
/// backed until the first reservation actually extends it, which is
/// what makes that first page come in `is_new` and get its page header
/// stamped.
pub struct InMemoryLogAllocator {
    inner: Mutex<AllocatorInner>,
}

impl Default for InMemoryLogAllocator {
    fn default() -> Self {
        InMemoryLogAllocator {
            inner: Mutex::new(AllocatorInner {
                logs: HashMap::new(),
                free: HashMap::new(),
                next: 1,
            }),
        }
    }
}

impl InMemoryLogAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UndoLogAllocator for InMemoryLogAllocator {
    type Log = UndoLogNumber;

    fn get_log(&self, persistence: Persistence) -> Self::Log {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reused) = inner.free.get_mut(&persistence).and_then(Vec::pop) {
            return reused;
        }
        let number = inner.next;
        inner.next += 1;
        inner.logs.insert(
            number,
            LogMeta {
                persistence,
                insert: urs_common::SIZE_OF_UNDO_PAGE_HEADER as u64,
                discard: 0,
                end: 0,
                size: UNDO_LOG_MAX_SIZE,
                force_truncate: false,
            },
        );
        number
    }

    fn log_number(&self, log: Self::Log) -> UndoLogNumber {
        log
    }

    fn find_by_number(&self, number: UndoLogNumber) -> Self::Log {
        number
    }

    fn meta_insert(&self, log: Self::Log) -> UndoLogOffset {
        self.inner.lock().unwrap().logs[&log].insert
    }

    fn set_meta_insert(&self, log: Self::Log, new_insert: UndoLogOffset) {
        self.inner.lock().unwrap().logs.get_mut(&log).unwrap().insert = new_insert;
    }

    fn meta_discard(&self, log: Self::Log) -> UndoLogOffset {
        self.inner.lock().unwrap().logs[&log].discard
    }

    fn end(&self, log: Self::Log) -> UndoLogOffset {
        self.inner.lock().unwrap().logs[&log].end
    }

    fn size(&self, log: Self::Log) -> UndoLogOffset {
        self.inner.lock().unwrap().logs[&log].size
    }

    fn force_truncate(&self, log: Self::Log) -> bool {
        self.inner.lock().unwrap().logs[&log].force_truncate
    }

    fn clear_force_truncate(&self, log: Self::Log) {
        self.inner
            .lock()
            .unwrap()
            .logs
            .get_mut(&log)
            .unwrap()
            .force_truncate = false;
    }

    fn extend(&self, log: Self::Log, new_end: UndoLogOffset) {
        let mut inner = self.inner.lock().unwrap();
        let meta = inner.logs.get_mut(&log).unwrap();
        if new_end > meta.end {
            meta.end = new_end;
        }
    }

    fn truncate(&self, log: Self::Log) {
        self.inner
            .lock()
            .unwrap()
            .logs
            .get_mut(&log)
            .unwrap()
            .force_truncate = true;
    }

    fn put(&self, log: Self::Log) {
        let mut inner = self.inner.lock().unwrap();
        let persistence = inner.logs[&log].persistence;
        inner.free.entry(persistence).or_default().push(log);
    }

    fn for_each_log(&self, f: &mut dyn FnMut(Self::Log)) {
        let numbers: Vec<UndoLogNumber> = self.inner.lock().unwrap().logs.keys().copied().collect();
        for number in numbers {
            f(number);
        }
    }
}

/// A reference `BufferManager`: pages are plain in-memory byte arrays
/// behind one mutex, and pins/locks are tracked in simple sets purely
/// for catching double-pin/double-lock bugs in tests — there is no real
/// contention to arbitrate in a single-process test double.
pub struct InMemoryBufferManager {
    pages: Mutex<HashMap<(UndoLogNumber, u64), Page>>,
    locked: Mutex<HashSet<(UndoLogNumber, u64)>>,
    dirty: Mutex<HashSet<(UndoLogNumber, u64)>>,
    lsn: Mutex<HashMap<(UndoLogNumber, u64), u64>>,
}

impl Default for InMemoryBufferManager {
    fn default() -> Self {
        InMemoryBufferManager {
            pages: Mutex::new(HashMap::new()),
            locked: Mutex::new(HashSet::new()),
            dirty: Mutex::new(HashSet::new()),
            lsn: Mutex::new(HashMap::new()),
        }
    }
}

impl InMemoryBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self, buf: (UndoLogNumber, u64)) -> bool {
        self.dirty.lock().unwrap().contains(&buf)
    }

    pub fn lsn_of(&self, buf: (UndoLogNumber, u64)) -> Option<u64> {
        self.lsn.lock().unwrap().get(&buf).copied()
    }

    /// Snapshot a page's current bytes — useful in tests that compare a
    /// pre-state copy against a post-replay state.
    pub fn snapshot(&self, buf: (UndoLogNumber, u64)) -> Page {
        *self
            .pages
            .lock()
            .unwrap()
            .entry(buf)
            .or_insert_with(empty_page)
    }
}

impl BufferManager for InMemoryBufferManager {
    type BufferRef = (UndoLogNumber, u64);

    fn pin(&self, log: UndoLogNumber, blkno: u64, mode: ReadBufferMode) -> Self::BufferRef {
        let key = (log, blkno);
        let mut pages = self.pages.lock().unwrap();
        match mode {
            ReadBufferMode::Normal => {
                pages.entry(key).or_insert_with(empty_page);
            }
            ReadBufferMode::Zero | ReadBufferMode::ZeroAndLock => {
                pages.insert(key, empty_page());
            }
        }
        drop(pages);
        if mode == ReadBufferMode::ZeroAndLock {
            self.lock_exclusive(key);
        }
        key
    }

    fn lock_exclusive(&self, buf: Self::BufferRef) {
        self.locked.lock().unwrap().insert(buf);
    }

    fn lock_shared(&self, buf: Self::BufferRef) {
        self.locked.lock().unwrap().insert(buf);
    }

    fn with_page<R>(&self, buf: Self::BufferRef, f: impl FnOnce(&mut Page) -> R) -> R {
        let mut pages = self.pages.lock().unwrap();
        let page = pages.entry(buf).or_insert_with(empty_page);
        f(page)
    }

    fn mark_dirty(&self, buf: Self::BufferRef) {
        self.dirty.lock().unwrap().insert(buf);
    }

    fn set_lsn(&self, buf: Self::BufferRef, lsn: u64) {
        self.lsn.lock().unwrap().insert(buf, lsn);
    }

    fn unlock_release(&self, buf: Self::BufferRef) {
        self.locked.lock().unwrap().remove(&buf);
    }

    fn log_of(&self, buf: Self::BufferRef) -> UndoLogNumber {
        buf.0
    }

    fn block_of(&self, buf: Self::BufferRef) -> u64 {
        buf.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_log_reuses_returned_slots() {
        let allocator = InMemoryLogAllocator::new();
        let a = allocator.get_log(Persistence::Permanent);
        allocator.put(a);
        let b = allocator.get_log(Persistence::Permanent);
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_log_starts_past_first_page_header_with_nothing_yet_extended() {
        let allocator = InMemoryLogAllocator::new();
        let log = allocator.get_log(Persistence::Permanent);
        assert_eq!(
            allocator.meta_insert(log),
            urs_common::SIZE_OF_UNDO_PAGE_HEADER as u64
        );
        assert_eq!(allocator.end(log), 0);
    }

    #[test]
    fn buffer_manager_zero_mode_resets_page() {
        let bm = InMemoryBufferManager::new();
        let buf = bm.pin(1, 0, ReadBufferMode::Normal);
        bm.with_page(buf, |p| p[0] = 0xFF);
        let buf = bm.pin(1, 0, ReadBufferMode::Zero);
        bm.with_page(buf, |p| assert_eq!(p[0], 0));
    }

    #[test]
    fn lsn_and_dirty_bookkeeping() {
        let bm = InMemoryBufferManager::new();
        let buf = bm.pin(2, 1, ReadBufferMode::Normal);
        assert!(!bm.is_dirty(buf));
        bm.mark_dirty(buf);
        assert!(bm.is_dirty(buf));
        bm.set_lsn(buf, 42);
        assert_eq!(bm.lsn_of(buf), Some(42));
    }
}
