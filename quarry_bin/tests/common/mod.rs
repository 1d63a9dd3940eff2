#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use strata::{
    BufferPool, Catalog, ColumnDef, Field, FieldType, HeapFile, LogFile, Transaction, Tuple,
    TupleDesc, TupleSource,
};

/// One wired-up database instance. Dropping it without a shutdown models a
/// crash: in-memory state vanishes, only the data files and the log remain.
pub struct TestDb {
    pub catalog: Arc<Catalog>,
    pub wal: Arc<LogFile>,
    pub pool: Arc<BufferPool>,
}

pub fn int_string_desc() -> TupleDesc {
    TupleDesc::new(vec![
        ColumnDef::new("id", FieldType::Int),
        ColumnDef::new("label", FieldType::Str),
    ])
}

pub fn tuple(i: i32, s: &str) -> Tuple {
    Tuple::new(
        int_string_desc(),
        vec![Field::Int(i), Field::Str(s.to_string())],
    )
    .unwrap()
}

/// Wires catalog, log, and pool over the given directory, registering one
/// int/string table per name.
pub fn open_db(dir: &Path, capacity: usize, tables: &[&str]) -> TestDb {
    let catalog = Arc::new(Catalog::new());
    for name in tables {
        let file = HeapFile::open(dir.join(format!("{name}.dat")), int_string_desc()).unwrap();
        catalog.add_table(Arc::new(file), name);
    }
    let wal = Arc::new(LogFile::open(dir.join("quarry.wal")).unwrap());
    let pool = Arc::new(BufferPool::new(capacity, catalog.clone(), wal.clone()));
    TestDb { catalog, wal, pool }
}

/// Restart after a crash: rebuild everything from disk, then recover.
pub fn reopen_and_recover(dir: &Path, capacity: usize, tables: &[&str]) -> TestDb {
    let db = open_db(dir, capacity, tables);
    db.wal.recover(&db.pool).unwrap();
    db
}

pub fn begin(db: &TestDb) -> Transaction {
    let mut tx = Transaction::new();
    tx.start(&db.wal).unwrap();
    tx
}

pub fn table_id(db: &TestDb, name: &str) -> u32 {
    db.catalog.table_id(name).unwrap()
}

/// All live tuples of the table, in page order, read under the transaction.
pub fn scan_table(db: &TestDb, tx: &Transaction, name: &str) -> Vec<Tuple> {
    let file = db.catalog.file(table_id(db, name)).unwrap();
    let mut it = file.iterator(tx.id(), db.pool.clone());
    it.open().unwrap();
    let mut out = Vec::new();
    while it.has_next().unwrap() {
        out.push(it.next().unwrap());
    }
    it.close();
    out
}

/// Scan inside a fresh transaction that commits afterwards.
pub fn scan_committed(db: &TestDb, name: &str) -> Vec<Tuple> {
    let mut tx = begin(db);
    let rows = scan_table(db, &tx, name);
    tx.commit(&db.pool).unwrap();
    rows
}

pub fn insert_and_commit(db: &TestDb, name: &str, rows: &[(i32, &str)]) {
    let mut tx = begin(db);
    let tid = table_id(db, name);
    for (i, s) in rows {
        db.pool.insert_tuple(tx.id(), tid, tuple(*i, s)).unwrap();
    }
    tx.commit(&db.pool).unwrap();
}
