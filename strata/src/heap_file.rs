//! Heap files: a file of equally sized pages, with tuple-level insert and
//! delete routed through the buffer pool.

use crate::buffer_pool::BufferPool;
use crate::error::{Error, Result};
use crate::lock_manager::Perm;
use crate::page::{HeapPage, HeapPageId};
use crate::schema::TupleDesc;
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleSource};
use crate::PAGE_SIZE;
use log::debug;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// A heap-organized table backed by one file. Page `k` occupies bytes
/// `[k * PAGE_SIZE, (k + 1) * PAGE_SIZE)`; the file length is always a
/// multiple of the page size.
pub struct HeapFile {
    file: Mutex<File>,
    path: PathBuf,
    desc: TupleDesc,
    table_id: u32,
}

impl HeapFile {
    /// Opens (creating if needed) the backing file. The table id is the
    /// CRC-32 of the canonical path, so reopening the same file yields the
    /// same id.
    pub fn open<P: AsRef<Path>>(path: P, desc: TupleDesc) -> Result<HeapFile> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let path = std::fs::canonicalize(path_ref)?;
        let table_id = crc32fast::hash(path.to_string_lossy().as_bytes());
        debug!("[heap] opened {path:?} as table {table_id}");

        Ok(HeapFile {
            file: Mutex::new(file),
            path,
            desc,
            table_id,
        })
    }

    pub fn id(&self) -> u32 {
        self.table_id
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn num_pages(&self) -> Result<usize> {
        let file = self.lock_file();
        Ok(file.metadata()?.len() as usize / PAGE_SIZE)
    }

    /// Reads the page image at the id's page number straight from disk.
    pub fn read_page(&self, pid: HeapPageId) -> Result<HeapPage> {
        let mut buf = vec![0u8; PAGE_SIZE];
        {
            let mut file = self.lock_file();
            file.seek(SeekFrom::Start((pid.page_no * PAGE_SIZE) as u64))?;
            file.read_exact(&mut buf)?;
        }
        HeapPage::new(pid, &buf, self.desc.clone())
    }

    /// Overwrites the page's slot in the file.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let data = page.serialize();
        let mut file = self.lock_file();
        file.seek(SeekFrom::Start((page.id().page_no * PAGE_SIZE) as u64))?;
        file.write_all(&data)?;
        Ok(())
    }

    /// Extends the file by one empty page and returns its id.
    fn append_empty_page(&self) -> Result<HeapPageId> {
        let mut file = self.lock_file();
        let page_no = file.metadata()?.len() as usize / PAGE_SIZE;
        file.seek(SeekFrom::Start((page_no * PAGE_SIZE) as u64))?;
        file.write_all(&HeapPage::empty_page_data())?;
        Ok(HeapPageId::new(self.table_id, page_no))
    }

    /// Find-or-append: scans pages under a read lock looking for a free
    /// slot, upgrading to a write lock only on the page actually mutated.
    /// If every page is full, the file grows by one page. Returns the ids of
    /// the pages dirtied.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        t: Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<HeapPageId>> {
        if t.desc() != &self.desc {
            return Err(Error::SchemaMismatch);
        }

        for page_no in 0..self.num_pages()? {
            let pid = HeapPageId::new(self.table_id, page_no);
            let page = pool.get_page(tid, pid, Perm::ReadOnly)?;
            let has_room = page.read().num_empty_slots() > 0;
            if !has_room {
                pool.release_page(tid, pid);
                continue;
            }

            pool.release_page(tid, pid);
            let page = pool.get_page(tid, pid, Perm::ReadWrite)?;
            let mut guard = page.write();
            // Another transaction may have taken the last slot between the
            // read-lock probe and the upgrade.
            if guard.num_empty_slots() > 0 {
                guard.insert_tuple(t)?;
                return Ok(vec![pid]);
            }
            drop(guard);
            pool.release_page(tid, pid);
        }

        let pid = self.append_empty_page()?;
        debug!("[heap] table {} grew to page {}", self.table_id, pid.page_no);
        let page = pool.get_page(tid, pid, Perm::ReadWrite)?;
        page.write().insert_tuple(t)?;
        Ok(vec![pid])
    }

    /// Deletes the tuple named by its record identifier. Returns the ids of
    /// the pages dirtied.
    pub fn delete_tuple(
        &self,
        tid: TransactionId,
        t: &Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<HeapPageId>> {
        let rid = t.record_id().ok_or(Error::TupleNotOnPage)?;
        if rid.page_id.table_id != self.table_id {
            return Err(Error::TupleNotOnPage);
        }
        let page = pool.get_page(tid, rid.page_id, Perm::ReadWrite)?;
        page.write().delete_tuple(t)?;
        Ok(vec![rid.page_id])
    }

    /// A lazy forward cursor over all live tuples, in page-number order.
    pub fn iterator(
        self: &Arc<Self>,
        tid: TransactionId,
        pool: Arc<BufferPool>,
    ) -> HeapFileIterator {
        HeapFileIterator {
            file: self.clone(),
            pool,
            tid,
            next_page: 0,
            buffered: VecDeque::new(),
            opened: false,
        }
    }
}

/// Forward-only tuple cursor over a heap file. Pages are fetched read-only
/// through the buffer pool one at a time, on demand.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    next_page: usize,
    buffered: VecDeque<Tuple>,
    opened: bool,
}

impl TupleSource for HeapFileIterator {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        self.next_page = 0;
        self.buffered.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.opened = false;
        self.next_page = 0;
        self.buffered.clear();
    }

    fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.opened {
            return Ok(false);
        }
        while self.buffered.is_empty() && self.next_page < self.file.num_pages()? {
            let pid = HeapPageId::new(self.file.id(), self.next_page);
            self.next_page += 1;
            let page = self.pool.get_page(self.tid, pid, Perm::ReadOnly)?;
            let guard = page.read();
            self.buffered.extend(guard.tuples().cloned());
        }
        Ok(!self.buffered.is_empty())
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(Error::NoSuchElement);
        }
        Ok(self.buffered.pop_front().expect("buffer is non-empty"))
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.file.tuple_desc()
    }
}
