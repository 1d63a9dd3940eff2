mod common;

use common::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use strata::{Error, Field, HeapPageId, Perm};
use tempfile::tempdir;

#[test]
fn shared_locks_coexist_and_exclusive_blocks() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), 8, &["r"]);
    insert_and_commit(&db, "r", &[(1, "a")]);

    let pid = HeapPageId::new(table_id(&db, "r"), 0);
    let t1 = begin(&db);
    let t2 = begin(&db);

    db.pool.get_page(t1.id(), pid, Perm::ReadOnly).unwrap();
    db.pool.get_page(t2.id(), pid, Perm::ReadOnly).unwrap();
    assert!(db.pool.holds_lock(t1.id(), pid));
    assert!(db.pool.holds_lock(t2.id(), pid));
}

#[test]
fn upgrade_succeeds_once_the_other_sharer_releases() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), 8, &["r"]);
    insert_and_commit(&db, "r", &[(1, "a")]);

    let pid = HeapPageId::new(table_id(&db, "r"), 0);
    let t1 = begin(&db);
    let t2 = begin(&db);

    db.pool.get_page(t1.id(), pid, Perm::ReadOnly).unwrap();
    db.pool.get_page(t2.id(), pid, Perm::ReadOnly).unwrap();

    let pool = db.pool.clone();
    let t1_id = t1.id();
    let upgrader = thread::spawn(move || pool.get_page(t1_id, pid, Perm::ReadWrite).map(|_| ()));

    // Let the upgrader park on the second sharer, then release it.
    thread::sleep(Duration::from_millis(100));
    assert!(!upgrader.is_finished());
    db.pool.release_page(t2.id(), pid);

    upgrader.join().unwrap().unwrap();
    assert!(db.pool.holds_lock(t1.id(), pid));
}

#[test]
fn two_way_deadlock_aborts_exactly_one_transaction() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), 8, &["a", "b"]);
    insert_and_commit(&db, "a", &[(1, "a")]);
    insert_and_commit(&db, "b", &[(2, "b")]);

    let pid_a = HeapPageId::new(table_id(&db, "a"), 0);
    let pid_b = HeapPageId::new(table_id(&db, "b"), 0);
    let barrier = Arc::new(Barrier::new(2));

    let run = |first: HeapPageId, second: HeapPageId, db: &TestDb| {
        let pool = db.pool.clone();
        let barrier = barrier.clone();
        let mut tx = begin(db);
        let pool_for_abort = db.pool.clone();
        thread::spawn(move || {
            pool.get_page(tx.id(), first, Perm::ReadWrite).unwrap();
            barrier.wait();
            let result = pool.get_page(tx.id(), second, Perm::ReadWrite).map(|_| ());
            match &result {
                Ok(()) => tx.commit(&pool_for_abort).unwrap(),
                Err(_) => tx.abort(&pool_for_abort).unwrap(),
            }
            result
        })
    };

    let h1 = run(pid_a, pid_b, &db);
    let h2 = run(pid_b, pid_a, &db);
    let results = [h1.join().unwrap(), h2.join().unwrap()];

    let aborted = results
        .iter()
        .filter(|r| matches!(r, Err(Error::TransactionAborted)))
        .count();
    let completed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(aborted, 1, "exactly one victim");
    assert_eq!(completed, 1, "the survivor finishes");
}

#[test]
fn deadlock_between_two_upgraders_aborts_one() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), 8, &["r"]);
    insert_and_commit(&db, "r", &[(1, "a")]);

    let pid = HeapPageId::new(table_id(&db, "r"), 0);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let pool = db.pool.clone();
            let barrier = barrier.clone();
            let mut tx = begin(&db);
            thread::spawn(move || {
                pool.get_page(tx.id(), pid, Perm::ReadOnly).unwrap();
                barrier.wait();
                let result = pool.get_page(tx.id(), pid, Perm::ReadWrite).map(|_| ());
                match &result {
                    Ok(()) => tx.commit(&pool).unwrap(),
                    Err(_) => tx.abort(&pool).unwrap(),
                }
                result
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let aborted = results
        .iter()
        .filter(|r| matches!(r, Err(Error::TransactionAborted)))
        .count();
    assert_eq!(aborted, 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
}

#[test]
fn locks_are_held_until_transaction_completion() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), 8, &["r"]);
    insert_and_commit(&db, "r", &[(1, "a")]);

    let pid = HeapPageId::new(table_id(&db, "r"), 0);
    let mut tx = begin(&db);
    db.pool
        .insert_tuple(tx.id(), table_id(&db, "r"), tuple(2, "b"))
        .unwrap();
    assert!(db.pool.holds_lock(tx.id(), pid));

    tx.commit(&db.pool).unwrap();
    assert!(!db.pool.holds_lock(tx.id(), pid));
    assert!(db.pool.lock_manager().locked_pages(tx.id()).is_empty());
}

#[test]
fn completion_leaves_no_dirty_pages_for_the_transaction() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), 8, &["r"]);

    // Commit path.
    let mut t1 = begin(&db);
    db.pool
        .insert_tuple(t1.id(), table_id(&db, "r"), tuple(1, "a"))
        .unwrap();
    t1.commit(&db.pool).unwrap();
    let pid = HeapPageId::new(table_id(&db, "r"), 0);
    let probe = begin(&db);
    let page = db.pool.get_page(probe.id(), pid, Perm::ReadOnly).unwrap();
    assert_eq!(page.read().dirtier(), None);
    db.pool.release_page(probe.id(), pid);

    // Abort path.
    let mut t2 = begin(&db);
    db.pool
        .insert_tuple(t2.id(), table_id(&db, "r"), tuple(2, "b"))
        .unwrap();
    t2.abort(&db.pool).unwrap();
    let page = db.pool.get_page(probe.id(), pid, Perm::ReadOnly).unwrap();
    assert_eq!(page.read().dirtier(), None);

    assert_eq!(scan_committed(&db, "r"), vec![tuple(1, "a")]);
}

#[test]
fn aborted_writer_does_not_block_the_next_writer() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), 8, &["r"]);
    insert_and_commit(&db, "r", &[(1, "a")]);

    let pid = HeapPageId::new(table_id(&db, "r"), 0);
    let mut loser = begin(&db);
    db.pool.get_page(loser.id(), pid, Perm::ReadWrite).unwrap();

    let pool = db.pool.clone();
    let mut winner = begin(&db);
    let winner_id = winner.id();
    let waiter = thread::spawn(move || pool.get_page(winner_id, pid, Perm::ReadWrite).map(|_| ()));

    thread::sleep(Duration::from_millis(100));
    assert!(!waiter.is_finished());
    loser.abort(&db.pool).unwrap();

    waiter.join().unwrap().unwrap();
    let rows = scan_table(&db, &winner, "r");
    assert_eq!(rows, vec![tuple(1, "a")]);
    winner.commit(&db.pool).unwrap();
}

#[test]
fn concurrent_inserters_lose_no_rows() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), 16, &["r"]);
    let tid = table_id(&db, "r");

    let threads = 4;
    let per_thread = 20;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|n| {
            let pool = db.pool.clone();
            let wal = db.wal.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for k in 0..per_thread {
                    let value = (n * per_thread + k) as i32;
                    loop {
                        let mut tx = strata::Transaction::new();
                        tx.start(&wal).unwrap();
                        let row = strata::Tuple::new(
                            int_string_desc(),
                            vec![Field::Int(value), Field::Str(format!("v{value}"))],
                        )
                        .unwrap();
                        match pool.insert_tuple(tx.id(), tid, row) {
                            Ok(()) => {
                                tx.commit(&pool).unwrap();
                                break;
                            }
                            Err(Error::TransactionAborted) => {
                                // Deadlock victim: give up the locks and retry.
                                tx.abort(&pool).unwrap();
                            }
                            Err(e) => panic!("insert failed: {e}"),
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let rows = scan_committed(&db, "r");
    assert_eq!(rows.len(), threads * per_thread);
    let mut values: Vec<i32> = rows
        .iter()
        .map(|t| match t.field(0) {
            Field::Int(v) => *v,
            other => panic!("unexpected field {other}"),
        })
        .collect();
    values.sort_unstable();
    let expected: Vec<i32> = (0..(threads * per_thread) as i32).collect();
    assert_eq!(values, expected);
}
