use std::cmp::Ordering;
use strata::{Error, Field, Result, Tuple, TupleDesc, TupleSource};

/// Comparison operators a predicate can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Compares one field of each tuple against a constant operand.
#[derive(Debug, Clone)]
pub struct Predicate {
    field: usize,
    op: Op,
    operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: Op, operand: Field) -> Self {
        Self { field, op, operand }
    }

    /// A type mismatch between field and operand never matches.
    pub fn matches(&self, t: &Tuple) -> bool {
        let Some(ord) = t.field(self.field).partial_cmp(&self.operand) else {
            return false;
        };
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
        }
    }
}

/// Passes through the child's tuples that satisfy the predicate.
pub struct Filter {
    predicate: Predicate,
    child: Box<dyn TupleSource>,
    pending: Option<Tuple>,
}

impl Filter {
    pub fn new(predicate: Predicate, child: Box<dyn TupleSource>) -> Self {
        Self {
            predicate,
            child,
            pending: None,
        }
    }
}

impl TupleSource for Filter {
    fn open(&mut self) -> Result<()> {
        self.pending = None;
        self.child.open()
    }

    fn close(&mut self) {
        self.pending = None;
        self.child.close()
    }

    fn rewind(&mut self) -> Result<()> {
        self.pending = None;
        self.child.rewind()
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        while self.child.has_next()? {
            let t = self.child.next()?;
            if self.predicate.matches(&t) {
                self.pending = Some(t);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(Error::NoSuchElement);
        }
        Ok(self.pending.take().expect("has_next buffered a tuple"))
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.child.tuple_desc()
    }
}
