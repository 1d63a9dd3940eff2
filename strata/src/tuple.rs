use crate::error::{Error, Result};
use crate::page::HeapPageId;
use crate::schema::{FieldType, TupleDesc, STRING_LEN};
use bytes::{BufMut, BytesMut};
use std::cmp::Ordering;
use std::fmt;
use std::io::Read;

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    /// Appends the fixed-width big-endian encoding of this field.
    ///
    /// Strings longer than the field capacity are truncated; shorter ones are
    /// zero-padded so every field of a type occupies the same width.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            Field::Int(v) => buf.put_i32(*v),
            Field::Str(s) => {
                let bytes = s.as_bytes();
                let len = bytes.len().min(STRING_LEN);
                buf.put_u32(len as u32);
                buf.put_slice(&bytes[..len]);
                buf.put_bytes(0, STRING_LEN - len);
            }
        }
    }

    /// Parses one field of the given type from a reader.
    pub fn parse(field_type: FieldType, r: &mut impl Read) -> Result<Field> {
        match field_type {
            FieldType::Int => {
                let mut b = [0u8; 4];
                r.read_exact(&mut b)?;
                Ok(Field::Int(i32::from_be_bytes(b)))
            }
            FieldType::Str => {
                let mut b = [0u8; 4];
                r.read_exact(&mut b)?;
                let len = u32::from_be_bytes(b) as usize;
                if len > STRING_LEN {
                    return Err(Error::Corrupt(format!(
                        "string length {len} exceeds field capacity"
                    )));
                }
                let mut payload = [0u8; STRING_LEN];
                r.read_exact(&mut payload)?;
                let s = String::from_utf8_lossy(&payload[..len]).into_owned();
                Ok(Field::Str(s))
            }
        }
    }
}

impl PartialOrd for Field {
    /// Fields of different types are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => Some(a.cmp(b)),
            (Field::Str(a), Field::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The identity of a stored tuple: the page it lives on and its slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: HeapPageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: HeapPageId, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

/// A value for each field of a descriptor, optionally carrying the record
/// identifier of the slot it is stored in.
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: TupleDesc,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: TupleDesc, fields: Vec<Field>) -> Result<Tuple> {
        if fields.len() != desc.num_fields()
            || fields
                .iter()
                .enumerate()
                .any(|(i, f)| f.field_type() != desc.field_type(i))
        {
            return Err(Error::SchemaMismatch);
        }
        Ok(Tuple {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Appends this tuple's fixed-width encoding.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        for f in &self.fields {
            f.serialize_into(buf);
        }
    }

    /// Parses one tuple of the given descriptor from a reader.
    pub fn parse(desc: &TupleDesc, r: &mut impl Read) -> Result<Tuple> {
        let mut fields = Vec::with_capacity(desc.num_fields());
        for i in 0..desc.num_fields() {
            fields.push(Field::parse(desc.field_type(i), r)?);
        }
        Ok(Tuple {
            desc: desc.clone(),
            fields,
            record_id: None,
        })
    }
}

impl PartialEq for Tuple {
    /// Two tuples with the same fields are equal; the record id is identity
    /// of a stored copy, not part of the value.
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for field in &self.fields {
            if !first {
                write!(f, "\t")?;
            }
            write!(f, "{field}")?;
            first = false;
        }
        Ok(())
    }
}

/// Volcano-style cursor contract: the interface the operator layer consumes
/// from the core.
pub trait TupleSource {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self);
    fn rewind(&mut self) -> Result<()>;
    fn has_next(&mut self) -> Result<bool>;
    fn next(&mut self) -> Result<Tuple>;
    fn tuple_desc(&self) -> &TupleDesc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn desc() -> TupleDesc {
        TupleDesc::with_types(&[FieldType::Int, FieldType::Str])
    }

    #[test]
    fn field_round_trip() {
        let mut buf = BytesMut::new();
        Field::Int(-7).serialize_into(&mut buf);
        Field::Str("hello".into()).serialize_into(&mut buf);

        let mut r = Cursor::new(buf.freeze());
        assert_eq!(Field::parse(FieldType::Int, &mut r).unwrap(), Field::Int(-7));
        assert_eq!(
            Field::parse(FieldType::Str, &mut r).unwrap(),
            Field::Str("hello".into())
        );
    }

    #[test]
    fn long_strings_are_truncated_to_capacity() {
        let long = "x".repeat(STRING_LEN + 40);
        let mut buf = BytesMut::new();
        Field::Str(long).serialize_into(&mut buf);
        assert_eq!(buf.len(), 4 + STRING_LEN);

        let mut r = Cursor::new(buf.freeze());
        let Field::Str(s) = Field::parse(FieldType::Str, &mut r).unwrap() else {
            panic!("expected string field");
        };
        assert_eq!(s.len(), STRING_LEN);
    }

    #[test]
    fn tuple_equality_ignores_record_id() {
        let mut a = Tuple::new(desc(), vec![Field::Int(1), Field::Str("a".into())]).unwrap();
        let b = Tuple::new(desc(), vec![Field::Int(1), Field::Str("a".into())]).unwrap();
        a.set_record_id(Some(RecordId::new(HeapPageId::new(9, 3), 5)));
        assert_eq!(a, b);
    }

    #[test]
    fn mismatched_fields_are_rejected() {
        let err = Tuple::new(desc(), vec![Field::Int(1)]).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch));

        let err = Tuple::new(desc(), vec![Field::Str("a".into()), Field::Int(1)]).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch));
    }

    #[test]
    fn fields_of_different_types_are_unordered() {
        assert!(Field::Int(1)
            .partial_cmp(&Field::Str("1".into()))
            .is_none());
        assert!(Field::Int(1) < Field::Int(2));
    }
}
