use crate::buffer_pool::BufferPool;
use crate::error::Result;
use crate::wal::LogFile;
use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

/// A globally unique, monotonically assigned transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Vends a fresh identifier.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        TransactionId(NEXT_TID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Driver handle for one transaction's lifecycle.
///
/// `start` logs BEGIN; `commit` forces this transaction's update records and
/// then logs COMMIT; `abort` rolls back through the log and then tears down
/// the transaction's locks and dirty pages.
pub struct Transaction {
    tid: TransactionId,
    started: bool,
}

impl Transaction {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            tid: TransactionId::new(),
            started: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.tid
    }

    pub fn start(&mut self, wal: &LogFile) -> Result<()> {
        wal.log_begin(self.tid)?;
        self.started = true;
        Ok(())
    }

    pub fn commit(&mut self, pool: &BufferPool) -> Result<()> {
        self.complete(pool, true)
    }

    pub fn abort(&mut self, pool: &BufferPool) -> Result<()> {
        self.complete(pool, false)
    }

    fn complete(&mut self, pool: &BufferPool, commit: bool) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        debug!("[{}] complete, commit={commit}", self.tid);
        if commit {
            pool.transaction_complete(self.tid, true)?;
            pool.wal().log_commit(self.tid)?;
        } else {
            pool.wal().log_abort(self.tid, pool)?;
            pool.transaction_complete(self.tid, false)?;
        }
        self.started = false;
        Ok(())
    }
}
