//! The buffer pool: a bounded cache of heap pages shared by all
//! transactions, integrating the lock manager and the write-ahead log.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::lock_manager::{LockManager, Perm};
use crate::page::{HeapPage, HeapPageId};
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use crate::wal::LogFile;
use log::debug;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to a cached page. Readers take the page's read latch;
/// mutation additionally requires an exclusive lock from the lock manager.
pub type PageRef = Arc<RwLock<HeapPage>>;

type PageMap = HashMap<HeapPageId, PageRef>;

fn lock_map(m: &Mutex<PageMap>) -> MutexGuard<'_, PageMap> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A bounded page cache with random eviction.
///
/// Every fetch goes through the lock manager first, so a blocked thread is
/// parked before any pool state is touched. The map mutex is ordered before
/// the log's monitor: pool paths may log while holding the map, but the log
/// never touches the map while holding its own state.
pub struct BufferPool {
    capacity: usize,
    catalog: Arc<Catalog>,
    wal: Arc<LogFile>,
    cache: Mutex<PageMap>,
    lock_manager: LockManager,
}

impl BufferPool {
    pub fn new(capacity: usize, catalog: Arc<Catalog>, wal: Arc<LogFile>) -> Self {
        Self {
            capacity,
            catalog,
            wal,
            cache: Mutex::new(HashMap::new()),
            lock_manager: LockManager::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn wal(&self) -> &Arc<LogFile> {
        &self.wal
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize {
        lock_map(&self.cache).len()
    }

    /// Fetches a page with the requested permission, blocking on the lock.
    /// A cached page is returned as-is; otherwise the page is read from its
    /// heap file, evicting a resident first if the pool is at capacity.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: HeapPageId,
        perm: Perm,
    ) -> Result<PageRef> {
        self.lock_manager.acquire(tid, pid, perm)?;

        let mut cache = lock_map(&self.cache);
        if let Some(page) = cache.get(&pid) {
            return Ok(page.clone());
        }

        if cache.len() >= self.capacity {
            self.evict_page(&mut cache)?;
        }

        let page = self.catalog.file(pid.table_id)?.read_page(pid)?;
        let page = Arc::new(RwLock::new(page));
        cache.insert(pid, page.clone());
        Ok(page)
    }

    /// Evicts one resident chosen uniformly at random, flushing it first so
    /// the log-before-data ordering holds even for stolen pages.
    fn evict_page(&self, cache: &mut PageMap) -> Result<()> {
        let pids: Vec<HeapPageId> = cache.keys().copied().collect();
        let victim = pids[rand::rng().random_range(0..pids.len())];
        debug!("[pool] evicting {victim}");
        Self::flush_entry(&self.catalog, &self.wal, cache, victim)?;
        cache.remove(&victim);
        Ok(())
    }

    /// Adds a tuple to the table on behalf of the transaction, marking every
    /// dirtied page.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: u32, t: Tuple) -> Result<()> {
        let file = self.catalog.file(table_id)?;
        let dirtied = file.insert_tuple(tid, t, self)?;
        self.mark_dirtied(tid, &dirtied);
        Ok(())
    }

    /// Removes the tuple named by its record identifier, marking every
    /// dirtied page.
    pub fn delete_tuple(&self, tid: TransactionId, t: &Tuple) -> Result<()> {
        let rid = t.record_id().ok_or(crate::error::Error::TupleNotOnPage)?;
        let file = self.catalog.file(rid.page_id.table_id)?;
        let dirtied = file.delete_tuple(tid, t, self)?;
        self.mark_dirtied(tid, &dirtied);
        Ok(())
    }

    fn mark_dirtied(&self, tid: TransactionId, pids: &[HeapPageId]) {
        let cache = lock_map(&self.cache);
        for pid in pids {
            if let Some(page) = cache.get(pid) {
                page.write().mark_dirty(Some(tid));
            }
        }
    }

    /// Commits or aborts the transaction.
    ///
    /// On commit every page this transaction dirtied has its update record
    /// forced to the log, is written home, and becomes its own next
    /// before-image; a committed transaction's state is on disk before its
    /// locks are released. On abort the cached copies are replaced with
    /// fresh reads from disk. Either way the transaction's locks are
    /// released last.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let entries: Vec<(HeapPageId, PageRef)> = {
            let cache = lock_map(&self.cache);
            cache.iter().map(|(&pid, p)| (pid, p.clone())).collect()
        };

        for (pid, page) in entries {
            if commit {
                let mut guard = page.write();
                if guard.dirtier() == Some(tid) {
                    let before = guard.before_image()?;
                    self.wal.log_write(tid, &before, &guard)?;
                    self.wal.force()?;
                    self.catalog.file(pid.table_id)?.write_page(&guard)?;
                    guard.mark_dirty(None);
                    // This state is now durable; it is the baseline for the
                    // next transaction touching the page.
                    guard.set_before_image();
                }
            } else {
                let dirtied = page.read().dirtier() == Some(tid);
                if dirtied {
                    let fresh = self.catalog.file(pid.table_id)?.read_page(pid)?;
                    lock_map(&self.cache).insert(pid, Arc::new(RwLock::new(fresh)));
                }
            }
        }

        self.lock_manager.release_all(tid);
        Ok(())
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: HeapPageId) -> bool {
        self.lock_manager.holds_lock(tid, pid)
    }

    pub fn release_page(&self, tid: TransactionId, pid: HeapPageId) {
        self.lock_manager.release(tid, pid);
    }

    /// Writes one cached page to its heap file if dirty, logging and forcing
    /// its update record first. The page stays cached and becomes clean.
    pub fn flush_page(&self, pid: HeapPageId) -> Result<()> {
        let mut cache = lock_map(&self.cache);
        Self::flush_entry(&self.catalog, &self.wal, &mut cache, pid)
    }

    /// Flushes every cached page. Breaks the no-steal discipline when dirty
    /// pages of live transactions are present; meant for checkpoints and
    /// tests, not for regular transaction paths.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut cache = lock_map(&self.cache);
        let pids: Vec<HeapPageId> = cache.keys().copied().collect();
        for pid in pids {
            Self::flush_entry(&self.catalog, &self.wal, &mut cache, pid)?;
        }
        Ok(())
    }

    fn flush_entry(
        catalog: &Catalog,
        wal: &LogFile,
        cache: &mut PageMap,
        pid: HeapPageId,
    ) -> Result<()> {
        let Some(page) = cache.get(&pid) else {
            return Ok(());
        };
        let mut guard = page.write();
        if let Some(dirtier) = guard.dirtier() {
            let before = guard.before_image()?;
            wal.log_write(dirtier, &before, &guard)?;
            wal.force()?;
            catalog.file(pid.table_id)?.write_page(&guard)?;
            guard.mark_dirty(None);
        }
        Ok(())
    }

    /// Drops a page from the cache without flushing. Used by rollback and
    /// recovery after they restore the on-disk copy.
    pub fn discard_page(&self, pid: HeapPageId) {
        lock_map(&self.cache).remove(&pid);
    }
}
