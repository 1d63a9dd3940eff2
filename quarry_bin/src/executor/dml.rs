//! Tuple-producing insert and delete nodes. Each consumes its whole child on
//! the first `next` call and yields a single one-column tuple holding the
//! number of rows affected.

use std::sync::Arc;
use strata::{
    BufferPool, ColumnDef, Error, Field, FieldType, Result, TransactionId, Tuple, TupleDesc,
    TupleSource,
};

fn count_desc() -> TupleDesc {
    TupleDesc::new(vec![ColumnDef::new("count", FieldType::Int)])
}

fn count_tuple(n: i32) -> Result<Tuple> {
    Tuple::new(count_desc(), vec![Field::Int(n)])
}

/// Reads tuples from the child and installs them into a table.
pub struct Insert {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    table_id: u32,
    child: Box<dyn TupleSource>,
    desc: TupleDesc,
    done: bool,
}

impl Insert {
    pub fn new(
        pool: Arc<BufferPool>,
        tid: TransactionId,
        child: Box<dyn TupleSource>,
        table_id: u32,
    ) -> Result<Insert> {
        if child.tuple_desc() != &pool.catalog().tuple_desc(table_id)? {
            return Err(Error::SchemaMismatch);
        }
        Ok(Insert {
            pool,
            tid,
            table_id,
            child,
            desc: count_desc(),
            done: false,
        })
    }
}

impl TupleSource for Insert {
    fn open(&mut self) -> Result<()> {
        self.done = false;
        self.child.open()
    }

    fn close(&mut self) {
        self.child.close()
    }

    fn rewind(&mut self) -> Result<()> {
        self.done = false;
        self.child.rewind()
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.done)
    }

    fn next(&mut self) -> Result<Tuple> {
        if self.done {
            return Err(Error::NoSuchElement);
        }
        self.done = true;
        let mut n = 0;
        while self.child.has_next()? {
            self.pool.insert_tuple(self.tid, self.table_id, self.child.next()?)?;
            n += 1;
        }
        count_tuple(n)
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}

/// Reads tuples from the child and removes them from their table.
pub struct Delete {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    child: Box<dyn TupleSource>,
    desc: TupleDesc,
    done: bool,
}

impl Delete {
    pub fn new(pool: Arc<BufferPool>, tid: TransactionId, child: Box<dyn TupleSource>) -> Delete {
        Delete {
            pool,
            tid,
            child,
            desc: count_desc(),
            done: false,
        }
    }
}

impl TupleSource for Delete {
    fn open(&mut self) -> Result<()> {
        self.done = false;
        self.child.open()
    }

    fn close(&mut self) {
        self.child.close()
    }

    fn rewind(&mut self) -> Result<()> {
        self.done = false;
        self.child.rewind()
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.done)
    }

    fn next(&mut self) -> Result<Tuple> {
        if self.done {
            return Err(Error::NoSuchElement);
        }
        self.done = true;
        let mut n = 0;
        while self.child.has_next()? {
            let t = self.child.next()?;
            self.pool.delete_tuple(self.tid, &t)?;
            n += 1;
        }
        count_tuple(n)
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}
