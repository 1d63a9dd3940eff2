use std::sync::Arc;
use strata::{
    BufferPool, ColumnDef, HeapFileIterator, Result, Transaction, TupleDesc, TupleSource,
};

/// Sequential scan over one table. Columns are exposed under
/// `alias.column` names so joined plans can tell twins apart.
pub struct SeqScan {
    inner: HeapFileIterator,
    desc: TupleDesc,
}

impl SeqScan {
    pub fn new(
        pool: Arc<BufferPool>,
        tx: &Transaction,
        table_id: u32,
        alias: &str,
    ) -> Result<SeqScan> {
        let file = pool.catalog().file(table_id)?;
        let desc = TupleDesc::new(
            file.tuple_desc()
                .columns()
                .iter()
                .map(|c| ColumnDef::new(format!("{alias}.{}", c.name), c.field_type))
                .collect(),
        );
        let inner = file.iterator(tx.id(), pool);
        Ok(SeqScan { inner, desc })
    }
}

impl TupleSource for SeqScan {
    fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn rewind(&mut self) -> Result<()> {
        self.inner.rewind()
    }

    fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<strata::Tuple> {
        self.inner.next()
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}
