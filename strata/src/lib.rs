//! # Strata Storage Engine
//! The storage and transaction core of the Quarry database.
//! This crate owns the on-disk heap format, the locking buffer pool,
//! and the write-ahead log with crash recovery.

/// The buffer pool and its eviction policy.
pub mod buffer_pool;
/// Table registry mapping ids and names to heap files.
pub mod catalog;
/// Error types surfaced by the core.
pub mod error;
/// Heap files: pages on disk plus tuple-level insert/delete.
pub mod heap_file;
/// Page-level shared/exclusive locking with deadlock detection.
pub mod lock_manager;
/// The heap page layout and data structures.
pub mod page;
/// Column types and tuple descriptors.
pub mod schema;
/// Transaction identifiers and the commit/abort driver.
pub mod transaction;
/// Tuples, fields, and the tuple-source cursor contract.
pub mod tuple;
/// The write-ahead log and recovery.
pub mod wal;

/// The size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Default number of pages held by a buffer pool.
pub const DEFAULT_POOL_CAPACITY: usize = 50;

pub use buffer_pool::{BufferPool, PageRef};
pub use catalog::Catalog;
pub use error::{Error, Result};
pub use heap_file::{HeapFile, HeapFileIterator};
pub use lock_manager::{LockManager, Perm};
pub use page::{HeapPage, HeapPageId};
pub use schema::{ColumnDef, FieldType, TupleDesc};
pub use transaction::{Transaction, TransactionId};
pub use tuple::{Field, RecordId, Tuple, TupleSource};
pub use wal::LogFile;
