use thiserror::Error;

/// Errors surfaced by the storage core.
///
/// Logical storage errors (`PageFull`, `SlotEmpty`, ...) are fatal to the
/// operation but recoverable to the transaction. `TransactionAborted` means
/// the caller lost a deadlock and must roll back. `Io` is fatal to the
/// operation that hit it; inside recovery it halts startup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("page is full")]
    PageFull,

    #[error("tuple is not on this page")]
    TupleNotOnPage,

    #[error("slot {0} is already empty")]
    SlotEmpty(usize),

    #[error("tuple schema does not match the table schema")]
    SchemaMismatch,

    #[error("no table with id {0}")]
    NoSuchTable(u32),

    #[error("transaction aborted")]
    TransactionAborted,

    #[error("no log records for transaction {0}")]
    NoSuchTransaction(u64),

    #[error("cursor has no more tuples")]
    NoSuchElement,

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
