use crate::error::{Error, Result};
use crate::schema::TupleDesc;
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Tuple};
use crate::PAGE_SIZE;
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::io::Cursor;

/// Identifies a page: the table it belongs to and its zero-based position in
/// the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapPageId {
    pub table_id: u32,
    pub page_no: usize,
}

impl HeapPageId {
    pub fn new(table_id: u32, page_no: usize) -> Self {
        Self { table_id, page_no }
    }

    /// Integer representation written into log records.
    pub fn to_ints(self) -> [i32; 2] {
        [self.table_id as i32, self.page_no as i32]
    }

    /// Rebuilds an id from its integer representation.
    pub fn from_ints(args: &[i32]) -> Result<HeapPageId> {
        match args {
            [table_id, page_no] => Ok(HeapPageId {
                table_id: *table_id as u32,
                page_no: *page_no as usize,
            }),
            _ => Err(Error::Corrupt(format!(
                "page id expects 2 args, got {}",
                args.len()
            ))),
        }
    }
}

impl fmt::Display for HeapPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// Number of tuple slots on a page holding tuples of the given descriptor.
/// Each slot costs its tuple width plus one header bit.
pub fn slots_per_page(desc: &TupleDesc) -> usize {
    (PAGE_SIZE * 8) / (desc.byte_size() * 8 + 1)
}

/// Number of bytes the slot bitmap occupies.
pub fn header_size(desc: &TupleDesc) -> usize {
    slots_per_page(desc).div_ceil(8)
}

/// One page of a heap file: a slot bitmap followed by fixed-width tuple
/// slots, zero-padded to the page size.
///
/// Bit `i` of the bitmap (LSB-first within byte `i / 8`) is set iff slot `i`
/// holds a tuple. The page remembers the transaction that last dirtied it and
/// keeps a byte snapshot of its last clean state for the log.
#[derive(Debug)]
pub struct HeapPage {
    pid: HeapPageId,
    desc: TupleDesc,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    num_slots: usize,
    before_image: Vec<u8>,
    dirtier: Option<TransactionId>,
}

impl HeapPage {
    /// Parses a page image. Used slots must parse to valid tuples; unused
    /// slots are skipped. The image itself becomes the initial before-image.
    pub fn new(pid: HeapPageId, data: &[u8], desc: TupleDesc) -> Result<HeapPage> {
        if data.len() != PAGE_SIZE {
            return Err(Error::Corrupt(format!(
                "page image is {} bytes, expected {PAGE_SIZE}",
                data.len()
            )));
        }

        let num_slots = slots_per_page(&desc);
        let header = data[..header_size(&desc)].to_vec();
        let tuple_size = desc.byte_size();

        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if header[slot / 8] >> (slot % 8) & 1 == 1 {
                let start = header.len() + slot * tuple_size;
                let mut r = Cursor::new(&data[start..start + tuple_size]);
                let mut t = Tuple::parse(&desc, &mut r)?;
                t.set_record_id(Some(RecordId::new(pid, slot)));
                tuples.push(Some(t));
            } else {
                tuples.push(None);
            }
        }

        Ok(HeapPage {
            pid,
            desc,
            header,
            tuples,
            num_slots,
            before_image: data.to_vec(),
            dirtier: None,
        })
    }

    /// An all-zero page image: every slot empty.
    pub fn empty_page_data() -> Vec<u8> {
        vec![0; PAGE_SIZE]
    }

    pub fn id(&self) -> HeapPageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Produces the page image. Feeding the result back through `new` yields
    /// an identical page.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(PAGE_SIZE);
        buf.put_slice(&self.header);

        let tuple_size = self.desc.byte_size();
        for slot in 0..self.num_slots {
            match &self.tuples[slot] {
                Some(t) => t.serialize_into(&mut buf),
                None => buf.put_bytes(0, tuple_size),
            }
        }

        buf.put_bytes(0, PAGE_SIZE - buf.len());
        buf.to_vec()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots && self.header[slot / 8] >> (slot % 8) & 1 == 1
    }

    fn mark_slot(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots).filter(|&s| !self.is_slot_used(s)).count()
    }

    /// Places the tuple in the lowest-index empty slot and stamps its record
    /// identifier.
    pub fn insert_tuple(&mut self, mut t: Tuple) -> Result<RecordId> {
        if t.desc() != &self.desc {
            return Err(Error::SchemaMismatch);
        }
        let slot = (0..self.num_slots)
            .find(|&s| !self.is_slot_used(s))
            .ok_or(Error::PageFull)?;

        let rid = RecordId::new(self.pid, slot);
        t.set_record_id(Some(rid));
        self.mark_slot(slot, true);
        self.tuples[slot] = Some(t);
        Ok(rid)
    }

    /// Clears the slot named by the tuple's record identifier.
    pub fn delete_tuple(&mut self, t: &Tuple) -> Result<()> {
        let rid = t.record_id().ok_or(Error::TupleNotOnPage)?;
        if rid.page_id != self.pid {
            return Err(Error::TupleNotOnPage);
        }
        if !self.is_slot_used(rid.slot) {
            return Err(Error::SlotEmpty(rid.slot));
        }
        self.mark_slot(rid.slot, false);
        self.tuples[rid.slot] = None;
        Ok(())
    }

    /// Records the transaction dirtying the page, or clears the marker.
    pub fn mark_dirty(&mut self, dirtier: Option<TransactionId>) {
        self.dirtier = dirtier;
    }

    /// The transaction that last dirtied this page, if any.
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    /// A fresh page reconstructed from the last snapshot.
    pub fn before_image(&self) -> Result<HeapPage> {
        HeapPage::new(self.pid, &self.before_image, self.desc.clone())
    }

    /// Snapshots the current bytes as the new before-image. Called by the
    /// buffer pool once this page's state is covered by a forced log record.
    pub fn set_before_image(&mut self) {
        self.before_image = self.serialize();
    }

    /// Live tuples in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().filter_map(|t| t.as_ref())
    }
}
