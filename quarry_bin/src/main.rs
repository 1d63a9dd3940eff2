use quarry_bin::errors::QuarryError;
use quarry_bin::executor::SeqScan;
use quarry_bin::loader::load_schema;
use std::path::Path;
use std::sync::Arc;
use strata::{BufferPool, Catalog, LogFile, Transaction, TupleSource, DEFAULT_POOL_CAPACITY};

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("quarry: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), QuarryError> {
    let mut args = std::env::args().skip(1);
    let (Some(schema_path), Some(table)) = (args.next(), args.next()) else {
        return Err(QuarryError::Usage(
            "usage: quarry_bin SCHEMA_FILE TABLE".into(),
        ));
    };
    let schema_path = Path::new(&schema_path);
    let data_dir = schema_path.parent().unwrap_or_else(|| Path::new("."));

    let catalog = Arc::new(Catalog::new());
    load_schema(schema_path, &catalog)?;

    let wal = Arc::new(LogFile::open(data_dir.join("quarry.wal"))?);
    let pool = Arc::new(BufferPool::new(
        DEFAULT_POOL_CAPACITY,
        catalog.clone(),
        wal.clone(),
    ));
    wal.recover(&pool)?;

    let table_id = catalog
        .table_id(&table)
        .ok_or_else(|| QuarryError::Usage(format!("no table named {table}")))?;

    let mut tx = Transaction::new();
    tx.start(&wal)?;

    let mut scan = SeqScan::new(pool.clone(), &tx, table_id, &table)?;
    let header: Vec<&str> = (0..scan.tuple_desc().num_fields())
        .map(|i| scan.tuple_desc().field_name(i))
        .collect();
    println!("{}", header.join("\t"));

    scan.open()?;
    let mut rows = 0usize;
    while scan.has_next()? {
        println!("{}", scan.next()?);
        rows += 1;
    }
    scan.close();

    tx.commit(&pool)?;
    println!("({rows} rows)");
    Ok(())
}
