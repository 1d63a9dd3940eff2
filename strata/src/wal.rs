//! The write-ahead log: an append-only record file with physical
//! before/after page images, transaction rollback, checkpointing with
//! truncation, and crash recovery.
//!
//! On-disk layout, all integers big-endian:
//!
//! - The first 8 bytes hold the file offset of the most recent checkpoint
//!   record, or -1 if none has been written.
//! - Records follow, each `i32 type`, `i64 tid`, a type-specific payload,
//!   and a trailing `i64` holding the offset at which the record began.
//! - UPDATE payloads carry the before and after image of one page. An image
//!   is a 2-byte page-kind discriminator, a 2-byte id-kind discriminator,
//!   `i32` id-arg count plus that many `i32` args, and `i32` byte length
//!   plus the raw page bytes.
//! - CHECKPOINT payloads carry `i32 count` followed by `count` pairs of
//!   `(i64 tid, i64 first-record-offset)` for the transactions live at the
//!   checkpoint. The tid slot of the record itself holds -1.

use crate::buffer_pool::BufferPool;
use crate::error::{Error, Result};
use crate::page::{HeapPage, HeapPageId};
use crate::transaction::TransactionId;
use crate::PAGE_SIZE;
use bytes::{BufMut, BytesMut};
use log::{debug, error};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const ABORT_RECORD: i32 = 1;
const COMMIT_RECORD: i32 = 2;
const UPDATE_RECORD: i32 = 3;
const BEGIN_RECORD: i32 = 4;
const CHECKPOINT_RECORD: i32 = 5;

const NO_CHECKPOINT: i64 = -1;
const LOG_HEADER_SIZE: i64 = 8;

/// Page-kind and id-kind discriminators written in page images. New page
/// kinds extend these tables and the decoder in `read_page_image`.
const PAGE_KIND_HEAP: u16 = 1;
const ID_KIND_HEAP: u16 = 1;

struct LogState {
    file: File,
    /// Offset at which the next record will be appended.
    current_offset: i64,
    total_records: usize,
    /// True until either recovery runs or the first append decides the old
    /// log contents are stale and truncates them.
    recovery_undecided: bool,
    /// First log record offset of every live transaction.
    tid_to_first_record: HashMap<u64, i64>,
}

/// The log manager. All file access is serialized on the internal state
/// mutex; rollback, checkpoint, and recovery touch the buffer pool only
/// after releasing it, so the pool's map lock is never nested inside.
pub struct LogFile {
    path: PathBuf,
    state: Mutex<LogState>,
}

/// One UPDATE record's position, owner, and target page, captured during a
/// forward scan.
struct UpdateRec {
    tid: u64,
    start: i64,
    pid: HeapPageId,
}

struct RawImage {
    pid: HeapPageId,
    data: Vec<u8>,
}

fn read_i32(f: &mut File) -> Result<i32> {
    let mut b = [0u8; 4];
    f.read_exact(&mut b)?;
    Ok(i32::from_be_bytes(b))
}

fn read_i64(f: &mut File) -> Result<i64> {
    let mut b = [0u8; 8];
    f.read_exact(&mut b)?;
    Ok(i64::from_be_bytes(b))
}

fn read_u16(f: &mut File) -> Result<u16> {
    let mut b = [0u8; 2];
    f.read_exact(&mut b)?;
    Ok(u16::from_be_bytes(b))
}

fn put_page_image(buf: &mut BytesMut, pid: HeapPageId, data: &[u8]) {
    buf.put_u16(PAGE_KIND_HEAP);
    buf.put_u16(ID_KIND_HEAP);
    let args = pid.to_ints();
    buf.put_i32(args.len() as i32);
    for a in args {
        buf.put_i32(a);
    }
    buf.put_i32(data.len() as i32);
    buf.put_slice(data);
}

fn read_page_image(f: &mut File) -> Result<RawImage> {
    let page_kind = read_u16(f)?;
    let id_kind = read_u16(f)?;
    if page_kind != PAGE_KIND_HEAP || id_kind != ID_KIND_HEAP {
        return Err(Error::Corrupt(format!(
            "unknown page image kind {page_kind}/{id_kind}"
        )));
    }
    let arg_count = read_i32(f)?;
    if !(0..=8).contains(&arg_count) {
        return Err(Error::Corrupt(format!(
            "implausible page id arg count {arg_count}"
        )));
    }
    let mut args = Vec::with_capacity(arg_count as usize);
    for _ in 0..arg_count {
        args.push(read_i32(f)?);
    }
    let pid = HeapPageId::from_ints(&args)?;

    let len = read_i32(f)?;
    if len as usize != PAGE_SIZE {
        return Err(Error::Corrupt(format!(
            "page image is {len} bytes, expected {PAGE_SIZE}"
        )));
    }
    let mut data = vec![0u8; PAGE_SIZE];
    f.read_exact(&mut data)?;
    Ok(RawImage { pid, data })
}

/// Forward classify pass from `from` to the end of the log. Returns every
/// UPDATE record seen, in order, and the set of transactions whose effects
/// must not survive (BEGIN and ABORT add, COMMIT removes, CHECKPOINT adds
/// everything it lists).
fn scan_log(f: &mut File, from: i64) -> Result<(Vec<UpdateRec>, HashSet<u64>)> {
    let len = f.metadata()?.len() as i64;
    let mut updates = Vec::new();
    let mut active: HashSet<u64> = HashSet::new();

    let mut pos = from;
    while pos + 12 <= len {
        f.seek(SeekFrom::Start(pos as u64))?;
        let rec_type = read_i32(f)?;
        if rec_type == 0 {
            // zero-filled tail
            break;
        }
        let tid = read_i64(f)? as u64;
        match rec_type {
            BEGIN_RECORD => {
                active.insert(tid);
                read_i64(f)?;
            }
            COMMIT_RECORD => {
                active.remove(&tid);
                read_i64(f)?;
            }
            ABORT_RECORD => {
                // An aborted transaction must stay undone even after the
                // redo pass replays its updates, so it counts as a loser.
                // This also covers records whose BEGIN fell to truncation.
                active.insert(tid);
                read_i64(f)?;
            }
            UPDATE_RECORD => {
                let before = read_page_image(f)?;
                read_page_image(f)?;
                read_i64(f)?;
                updates.push(UpdateRec {
                    tid,
                    start: pos,
                    pid: before.pid,
                });
            }
            CHECKPOINT_RECORD => {
                let count = read_i32(f)?;
                for _ in 0..count {
                    let listed = read_i64(f)? as u64;
                    read_i64(f)?;
                    active.insert(listed);
                }
                read_i64(f)?;
            }
            other => {
                return Err(Error::Corrupt(format!("unknown log record type {other}")));
            }
        }
        pos = f.stream_position()? as i64;
    }
    Ok((updates, active))
}

impl LogFile {
    /// Opens (creating if needed) the log file. Whether the existing
    /// contents matter is decided lazily: `recover` reads them, while a
    /// first append without recovery throws them away.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<LogFile> {
        let path_buf = path.as_ref().to_path_buf();
        if let Some(parent) = path_buf.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path_buf)?;
        let len = file.metadata()?.len() as i64;

        Ok(LogFile {
            path: path_buf,
            state: Mutex::new(LogState {
                file,
                current_offset: len.max(LOG_HEADER_SIZE),
                total_records: 0,
                recovery_undecided: true,
                tid_to_first_record: HashMap::new(),
            }),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pre_append(st: &mut LogState) -> Result<()> {
        st.total_records += 1;
        if st.recovery_undecided {
            // Nobody asked for recovery before the first append, so the old
            // log contents are stale.
            st.recovery_undecided = false;
            st.file.set_len(0)?;
            st.file.seek(SeekFrom::Start(0))?;
            st.file.write_all(&NO_CHECKPOINT.to_be_bytes())?;
            st.current_offset = LOG_HEADER_SIZE;
        }
        Ok(())
    }

    fn append_record(st: &mut LogState, buf: &[u8]) -> Result<()> {
        st.file.seek(SeekFrom::Start(st.current_offset as u64))?;
        st.file.write_all(buf)?;
        st.current_offset = st.file.stream_position()? as i64;
        Ok(())
    }

    fn force_state(st: &mut LogState) -> Result<()> {
        st.file.sync_all()?;
        Ok(())
    }

    /// Forces everything appended so far to stable storage.
    pub fn force(&self) -> Result<()> {
        Self::force_state(&mut self.lock_state())
    }

    /// Number of records appended through this handle.
    pub fn total_records(&self) -> usize {
        self.lock_state().total_records
    }

    /// Appends BEGIN and remembers it as the transaction's first record.
    pub fn log_begin(&self, tid: TransactionId) -> Result<()> {
        let mut st = self.lock_state();
        if st.tid_to_first_record.contains_key(&tid.id()) {
            return Err(Error::Io(std::io::Error::other(format!(
                "{tid} already began"
            ))));
        }
        Self::pre_append(&mut st)?;

        let start = st.current_offset;
        let mut buf = BytesMut::new();
        buf.put_i32(BEGIN_RECORD);
        buf.put_i64(tid.id() as i64);
        buf.put_i64(start);
        Self::append_record(&mut st, &buf)?;
        st.tid_to_first_record.insert(tid.id(), start);
        debug!("[wal] BEGIN {tid} at {start}");
        Ok(())
    }

    /// Appends an UPDATE carrying the page's before and after images. Does
    /// not force; the caller forces before the page can reach disk.
    pub fn log_write(&self, tid: TransactionId, before: &HeapPage, after: &HeapPage) -> Result<()> {
        let mut st = self.lock_state();
        Self::pre_append(&mut st)?;

        let start = st.current_offset;
        let mut buf = BytesMut::new();
        buf.put_i32(UPDATE_RECORD);
        buf.put_i64(tid.id() as i64);
        put_page_image(&mut buf, before.id(), &before.serialize());
        put_page_image(&mut buf, after.id(), &after.serialize());
        buf.put_i64(start);
        Self::append_record(&mut st, &buf)?;
        debug!("[wal] UPDATE {tid} page {} at {start}", after.id());
        Ok(())
    }

    /// Appends COMMIT, forces the log, and forgets the transaction.
    pub fn log_commit(&self, tid: TransactionId) -> Result<()> {
        let mut st = self.lock_state();
        Self::pre_append(&mut st)?;

        let start = st.current_offset;
        let mut buf = BytesMut::new();
        buf.put_i32(COMMIT_RECORD);
        buf.put_i64(tid.id() as i64);
        buf.put_i64(start);
        Self::append_record(&mut st, &buf)?;
        Self::force_state(&mut st)?;
        st.tid_to_first_record.remove(&tid.id());
        debug!("[wal] COMMIT {tid} at {start}");
        Ok(())
    }

    /// Rolls the transaction back, appends ABORT, forces, and forgets the
    /// transaction. A failure in here leaves the database in an undefined
    /// state and is re-thrown after logging.
    pub fn log_abort(&self, tid: TransactionId, pool: &BufferPool) -> Result<()> {
        let result = self.abort_inner(tid, pool);
        if let Err(e) = &result {
            error!("[wal] abort of {tid} failed: {e}");
        }
        result
    }

    fn abort_inner(&self, tid: TransactionId, pool: &BufferPool) -> Result<()> {
        let undo = {
            let mut st = self.lock_state();
            Self::pre_append(&mut st)?;
            Self::collect_rollback(&mut st, tid)?
        };
        Self::apply_before_images(undo, pool)?;

        let mut st = self.lock_state();
        let start = st.current_offset;
        let mut buf = BytesMut::new();
        buf.put_i32(ABORT_RECORD);
        buf.put_i64(tid.id() as i64);
        buf.put_i64(start);
        Self::append_record(&mut st, &buf)?;
        Self::force_state(&mut st)?;
        st.tid_to_first_record.remove(&tid.id());
        debug!("[wal] ABORT {tid} at {start}");
        Ok(())
    }

    /// Restores the before-image of every page the transaction updated,
    /// newest-first, and drops those pages from the pool. Fails with a
    /// no-such-transaction kind if the transaction never logged BEGIN.
    pub fn rollback(&self, tid: TransactionId, pool: &BufferPool) -> Result<()> {
        let undo = {
            let mut st = self.lock_state();
            Self::collect_rollback(&mut st, tid)?
        };
        Self::apply_before_images(undo, pool)
    }

    fn collect_rollback(
        st: &mut LogState,
        tid: TransactionId,
    ) -> Result<Vec<(HeapPageId, Option<Vec<u8>>)>> {
        let first = *st
            .tid_to_first_record
            .get(&tid.id())
            .ok_or(Error::NoSuchTransaction(tid.id()))?;
        let (updates, _) = scan_log(&mut st.file, first)?;
        let losers = HashSet::from([tid.id()]);
        Self::undo_images(&mut st.file, &updates, &losers)
    }

    /// Shared by rollback and recovery: the before-image of every loser
    /// update, newest-first. An update whose page was later rewritten by a
    /// non-loser is returned without bytes (the committed version wins and
    /// only the pool copy is dropped).
    fn undo_images(
        f: &mut File,
        updates: &[UpdateRec],
        losers: &HashSet<u64>,
    ) -> Result<Vec<(HeapPageId, Option<Vec<u8>>)>> {
        let mut out = Vec::new();
        for (j, u) in updates.iter().enumerate().rev() {
            if !losers.contains(&u.tid) {
                continue;
            }
            let overwritten = updates[j + 1..]
                .iter()
                .any(|later| !losers.contains(&later.tid) && later.pid == u.pid);
            if overwritten {
                out.push((u.pid, None));
                continue;
            }

            f.seek(SeekFrom::Start(u.start as u64))?;
            let rec_type = read_i32(f)?;
            if rec_type != UPDATE_RECORD {
                return Err(Error::Corrupt(format!(
                    "expected an update record at {}",
                    u.start
                )));
            }
            read_i64(f)?;
            let before = read_page_image(f)?;
            out.push((before.pid, Some(before.data)));
        }
        Ok(out)
    }

    /// The after-image of every update, in log order.
    fn redo_images(f: &mut File, updates: &[UpdateRec]) -> Result<Vec<(HeapPageId, Vec<u8>)>> {
        let mut out = Vec::with_capacity(updates.len());
        for u in updates {
            f.seek(SeekFrom::Start(u.start as u64))?;
            let rec_type = read_i32(f)?;
            if rec_type != UPDATE_RECORD {
                return Err(Error::Corrupt(format!(
                    "expected an update record at {}",
                    u.start
                )));
            }
            read_i64(f)?;
            read_page_image(f)?;
            let after = read_page_image(f)?;
            out.push((after.pid, after.data));
        }
        Ok(out)
    }

    fn apply_before_images(
        images: Vec<(HeapPageId, Option<Vec<u8>>)>,
        pool: &BufferPool,
    ) -> Result<()> {
        for (pid, data) in images {
            if let Some(data) = data {
                Self::write_image(pid, &data, pool)?;
            }
            pool.discard_page(pid);
        }
        Ok(())
    }

    fn write_image(pid: HeapPageId, data: &[u8], pool: &BufferPool) -> Result<()> {
        let catalog = pool.catalog();
        let desc = catalog.tuple_desc(pid.table_id)?;
        let page = HeapPage::new(pid, data, desc)?;
        catalog.file(pid.table_id)?.write_page(&page)
    }

    /// Recovers the database: installs every committed update and removes
    /// every effect of transactions that were live at the crash. Must run
    /// before any append. Running it twice is idempotent.
    pub fn recover(&self, pool: &BufferPool) -> Result<()> {
        let (redo, undo) = {
            let mut st = self.lock_state();
            st.recovery_undecided = false;

            let len = st.file.metadata()?.len() as i64;
            if len < LOG_HEADER_SIZE {
                // Brand-new log: lay down the empty header.
                st.file.set_len(0)?;
                st.file.seek(SeekFrom::Start(0))?;
                st.file.write_all(&NO_CHECKPOINT.to_be_bytes())?;
                st.current_offset = LOG_HEADER_SIZE;
                return Ok(());
            }
            st.current_offset = len;
            if len == LOG_HEADER_SIZE {
                return Ok(());
            }

            let (updates, losers) = scan_log(&mut st.file, LOG_HEADER_SIZE)?;
            debug!(
                "[wal] recovery: {} updates, {} losers",
                updates.len(),
                losers.len()
            );
            let redo = Self::redo_images(&mut st.file, &updates)?;
            let undo = Self::undo_images(&mut st.file, &updates, &losers)?;
            (redo, undo)
        };

        // Physical redo of every update, including losers'.
        for (pid, data) in redo {
            Self::write_image(pid, &data, pool)?;
            pool.discard_page(pid);
        }
        // Undo of loser updates, newest-first.
        Self::apply_before_images(undo, pool)
    }

    /// Forces the log, flushes the pool, writes a CHECKPOINT naming every
    /// live transaction, points the header at it, and trims the log.
    pub fn log_checkpoint(&self, pool: &BufferPool) -> Result<()> {
        self.force()?;
        pool.flush_all_pages()?;

        let mut st = self.lock_state();
        Self::pre_append(&mut st)?;
        let start = st.current_offset;
        let mut buf = BytesMut::new();
        buf.put_i32(CHECKPOINT_RECORD);
        buf.put_i64(-1);
        buf.put_i32(st.tid_to_first_record.len() as i32);
        for (&tid, &first) in &st.tid_to_first_record {
            buf.put_i64(tid as i64);
            buf.put_i64(first);
        }
        buf.put_i64(start);
        Self::append_record(&mut st, &buf)?;

        st.file.seek(SeekFrom::Start(0))?;
        st.file.write_all(&start.to_be_bytes())?;
        Self::force_state(&mut st)?;
        debug!("[wal] CHECKPOINT at {start}");

        Self::truncate_inner(&mut st, &self.path)
    }

    /// Convenience shutdown: a checkpoint leaves the next startup with
    /// almost nothing to replay.
    pub fn shutdown(&self, pool: &BufferPool) -> Result<()> {
        self.log_checkpoint(pool)
    }

    /// Drops every record before the earliest one still needed, rewriting
    /// the survivors into a fresh file with adjusted offsets.
    pub fn log_truncate(&self) -> Result<()> {
        let mut st = self.lock_state();
        Self::pre_append(&mut st)?;
        Self::truncate_inner(&mut st, &self.path)
    }

    fn truncate_inner(st: &mut LogState, path: &Path) -> Result<()> {
        st.file.seek(SeekFrom::Start(0))?;
        let cp_loc = read_i64(&mut st.file)?;

        let mut min_log_record = if cp_loc == NO_CHECKPOINT {
            LOG_HEADER_SIZE
        } else {
            cp_loc
        };
        if cp_loc != NO_CHECKPOINT {
            st.file.seek(SeekFrom::Start(cp_loc as u64))?;
            let cp_type = read_i32(&mut st.file)?;
            if cp_type != CHECKPOINT_RECORD {
                return Err(Error::Corrupt(
                    "checkpoint pointer does not reference a checkpoint record".into(),
                ));
            }
            read_i64(&mut st.file)?;
            let count = read_i32(&mut st.file)?;
            for _ in 0..count {
                read_i64(&mut st.file)?;
                let first = read_i64(&mut st.file)?;
                min_log_record = min_log_record.min(first);
            }
        }

        let tmp_path = path.with_extension("tmp");
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let new_header = if cp_loc == NO_CHECKPOINT {
            NO_CHECKPOINT
        } else {
            (cp_loc - min_log_record) + LOG_HEADER_SIZE
        };
        out.write_all(&new_header.to_be_bytes())?;

        // Surviving records move to new offsets, so their trailing pointers,
        // the checkpoint's per-transaction offsets, and the live first-record
        // map all need rewriting.
        let len = st.file.metadata()?.len() as i64;
        let mut pos = min_log_record;
        while pos + 12 <= len {
            st.file.seek(SeekFrom::Start(pos as u64))?;
            let rec_type = read_i32(&mut st.file)?;
            if rec_type == 0 {
                break;
            }
            let tid = read_i64(&mut st.file)?;
            let new_start = out.stream_position()? as i64;

            let mut buf = BytesMut::new();
            buf.put_i32(rec_type);
            buf.put_i64(tid);
            match rec_type {
                UPDATE_RECORD => {
                    let before = read_page_image(&mut st.file)?;
                    let after = read_page_image(&mut st.file)?;
                    put_page_image(&mut buf, before.pid, &before.data);
                    put_page_image(&mut buf, after.pid, &after.data);
                }
                CHECKPOINT_RECORD => {
                    let count = read_i32(&mut st.file)?;
                    buf.put_i32(count);
                    for _ in 0..count {
                        let listed = read_i64(&mut st.file)?;
                        let first = read_i64(&mut st.file)?;
                        buf.put_i64(listed);
                        buf.put_i64((first - min_log_record) + LOG_HEADER_SIZE);
                    }
                }
                BEGIN_RECORD => {
                    if let Some(first) = st.tid_to_first_record.get_mut(&(tid as u64)) {
                        *first = new_start;
                    }
                }
                _ => {}
            }
            read_i64(&mut st.file)?;
            pos = st.file.stream_position()? as i64;

            buf.put_i64(new_start);
            out.write_all(&buf)?;
        }

        out.sync_all()?;
        drop(out);
        std::fs::rename(&tmp_path, path)?;

        st.file = OpenOptions::new().read(true).write(true).open(path)?;
        st.current_offset = st.file.metadata()?.len() as i64;
        debug!(
            "[wal] truncated to {} bytes (kept from {min_log_record})",
            st.current_offset
        );
        Ok(())
    }
}
