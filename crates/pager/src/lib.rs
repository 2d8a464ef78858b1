//! Page allocation, caching, and atomic commit.
//!
//! The pager sits between the B-tree and storage. It hands out owned
//! [`Page`] buffers, tracks modified pages in a dirty set for the duration
//! of a write transaction, and makes commits atomic with a rollback
//! journal: the journal snapshots the database file before any in-place
//! write, and is removed only after every dirty page and the page counter
//! have been flushed. A crash in between leaves the journal on disk, and
//! the next open rolls the file back to the pre-transaction state.
//!
//! Isolation comes from a single reader/writer transaction lock with
//! writer preference: any number of readers may share it, a writer drains
//! readers before acquiring, and once a writer is pending no new reader
//! may enter.

mod cache;
mod page;
#[cfg(test)]
mod tests;

pub use cache::PageCache;
pub use page::{Entry, Page, PageType};

use common::{DbError, DbResult, FILE_HEADER_SIZE, NO_PAGE, PAGE_SIZE, PageNumber};
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use storage::Storage;

/// Pages held by the LRU cache.
pub const DEFAULT_CACHE_PAGES: usize = 1000;

fn page_offset(number: PageNumber) -> u64 {
    (FILE_HEADER_SIZE + (number as usize - 1) * PAGE_SIZE) as u64
}

/// Reader/writer lock with writer preference, split into explicit
/// acquire/release halves so a transaction can span multiple calls.
struct TxLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

#[derive(Default)]
struct LockState {
    readers: usize,
    writer: bool,
    writers_pending: usize,
}

impl TxLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
        }
    }

    fn lock_shared(&self) {
        let mut state = self.state.lock();
        // A pending writer blocks new readers so writers cannot starve.
        while state.writer || state.writers_pending > 0 {
            self.cond.wait(&mut state);
        }
        state.readers += 1;
    }

    fn unlock_shared(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.readers > 0, "unlock_shared without a reader");
        state.readers = state.readers.saturating_sub(1);
        self.cond.notify_all();
    }

    fn lock_exclusive(&self) {
        let mut state = self.state.lock();
        state.writers_pending += 1;
        while state.writer || state.readers > 0 {
            self.cond.wait(&mut state);
        }
        state.writers_pending -= 1;
        state.writer = true;
    }

    fn unlock_exclusive(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.writer, "unlock_exclusive without a writer");
        state.writer = false;
        self.cond.notify_all();
    }
}

struct PagerInner {
    storage: Box<dyn Storage>,
    cache: PageCache,
    dirty: HashMap<PageNumber, Page>,
    max_page: PageNumber,
    max_page_at_begin: PageNumber,
    writing: bool,
}

/// Page allocator, transaction lock, and atomic-commit coordinator.
pub struct Pager {
    lock: TxLock,
    inner: Mutex<PagerInner>,
}

impl Pager {
    /// Wrap a storage backend, reading the max-page counter from the file
    /// header. A zero counter (fresh or never-written file) is treated as
    /// 1: page 1 is always reserved for the system catalog.
    pub fn open(mut storage: Box<dyn Storage>) -> DbResult<Self> {
        let mut header = [0u8; FILE_HEADER_SIZE];
        storage.read_at(0, &mut header)?;
        let raw = u32::from_le_bytes(header);
        let max_page = if raw == 0 { 1 } else { raw };

        Ok(Self {
            lock: TxLock::new(),
            inner: Mutex::new(PagerInner {
                storage,
                cache: PageCache::new(DEFAULT_CACHE_PAGES),
                dirty: HashMap::new(),
                max_page,
                max_page_at_begin: max_page,
                writing: false,
            }),
        })
    }

    /// Acquire the shared lock. Blocks while a writer is active or pending.
    pub fn begin_read(&self) -> DbResult<()> {
        self.lock.lock_shared();
        let result = self.inner.lock().storage.lock();
        if let Err(err) = result {
            self.lock.unlock_shared();
            return Err(err.into());
        }
        Ok(())
    }

    /// Release the shared lock.
    pub fn end_read(&self) -> DbResult<()> {
        let result = self.inner.lock().storage.unlock();
        self.lock.unlock_shared();
        result.map_err(Into::into)
    }

    /// Acquire the exclusive lock. Blocks until all readers drain and any
    /// prior writer releases.
    pub fn begin_write(&self) -> DbResult<()> {
        self.lock.lock_exclusive();
        let mut inner = self.inner.lock();
        if let Err(err) = inner.storage.lock() {
            drop(inner);
            self.lock.unlock_exclusive();
            return Err(err.into());
        }
        inner.writing = true;
        inner.max_page_at_begin = inner.max_page;
        Ok(())
    }

    /// Commit the write transaction and release the exclusive lock.
    ///
    /// Commit protocol: snapshot the database file to the journal, flush
    /// every dirty page (evicting each from the cache so a pre-commit copy
    /// is never served again), persist the max-page counter, then remove
    /// the journal. Durability is the journal removal: a crash before it
    /// rolls the whole transaction back at the next open.
    pub fn end_write(&self) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if !inner.writing {
            return Ok(());
        }

        let commit_result = Self::commit(&mut inner);
        inner.dirty.clear();
        inner.writing = false;
        let unlock_result = inner.storage.unlock();
        drop(inner);
        self.lock.unlock_exclusive();

        commit_result?;
        unlock_result.map_err(Into::into)
    }

    fn commit(inner: &mut PagerInner) -> DbResult<()> {
        tracing::debug!(dirty = inner.dirty.len(), max_page = inner.max_page, "commit");
        inner.storage.create_journal()?;

        let mut pages: Vec<Page> = inner.dirty.values().cloned().collect();
        pages.sort_unstable_by_key(Page::number);
        for page in &pages {
            inner
                .storage
                .write_at(page_offset(page.number()), page.bytes())?;
            inner.cache.remove(page.number());
        }
        inner.dirty.clear();

        let header = inner.max_page.to_le_bytes();
        inner.storage.write_at(0, &header)?;
        inner.storage.delete_journal()?;
        Ok(())
    }

    /// Abandon the write transaction: discard the dirty set and release
    /// the exclusive lock without touching storage. No journal exists
    /// until commit, so the on-disk image is unchanged.
    pub fn rollback_write(&self) {
        let mut inner = self.inner.lock();
        if !inner.writing {
            return;
        }
        tracing::warn!(discarded = inner.dirty.len(), "rollback write transaction");
        inner.dirty.clear();
        inner.max_page = inner.max_page_at_begin;
        inner.writing = false;
        let _ = inner.storage.unlock();
        drop(inner);
        self.lock.unlock_exclusive();
    }

    /// Fetch a page. During a write transaction the dirty set wins, so the
    /// in-flight copy of a modified page is always the one returned; after
    /// that the cache, then storage (populating the cache on the way out).
    pub fn get_page(&self, number: PageNumber) -> DbResult<Page> {
        if number == NO_PAGE {
            return Err(DbError::TransactionMisuse(
                "page 0 is reserved and cannot be fetched".into(),
            ));
        }

        let mut inner = self.inner.lock();
        if inner.writing {
            if let Some(page) = inner.dirty.get(&number) {
                return Ok(page.clone());
            }
        }
        if let Some(bytes) = inner.cache.get(number) {
            return Page::from_bytes(number, bytes);
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        inner.storage.read_at(page_offset(number), &mut buf)?;
        inner.cache.add(number, buf.clone());
        Page::from_bytes(number, buf)
    }

    /// Hand a modified page back to the pager. The page joins the dirty
    /// set and is evicted from the cache, preserving the invariant that a
    /// page number lives in at most one of the two at any time.
    pub fn put_page(&self, page: Page) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if !inner.writing {
            return Err(DbError::TransactionMisuse(
                "put_page outside a write transaction".into(),
            ));
        }
        inner.cache.remove(page.number());
        inner.dirty.insert(page.number(), page);
        Ok(())
    }

    /// Allocate a fresh zero-filled leaf page. Write transactions only.
    pub fn new_page(&self) -> DbResult<Page> {
        let mut inner = self.inner.lock();
        if !inner.writing {
            return Err(DbError::TransactionMisuse(
                "new_page outside a write transaction".into(),
            ));
        }
        inner.max_page += 1;
        let page = Page::new(inner.max_page);
        inner.dirty.insert(page.number(), page.clone());
        Ok(page)
    }

    /// Current max allocated page number.
    pub fn max_page(&self) -> PageNumber {
        self.inner.lock().max_page
    }
}
