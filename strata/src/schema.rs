use serde::{Deserialize, Serialize};

/// Fixed capacity of a string field's payload in bytes. A string field is
/// stored as a 4-byte length prefix followed by exactly this many bytes.
pub const STRING_LEN: usize = 128;

/// The closed set of column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Str,
}

impl FieldType {
    /// On-disk width of a field of this type.
    pub fn byte_size(self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str => 4 + STRING_LEN,
        }
    }
}

/// A named, typed column of a tuple descriptor.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub field_type: FieldType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// An ordered sequence of typed, named columns.
///
/// Two descriptors are equal iff their field-type sequences are identical;
/// column names do not participate in equality.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    columns: Vec<ColumnDef>,
}

impl TupleDesc {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    /// Descriptor with the given types and anonymous column names.
    pub fn with_types(types: &[FieldType]) -> Self {
        Self {
            columns: types
                .iter()
                .enumerate()
                .map(|(i, &t)| ColumnDef::new(format!("f{i}"), t))
                .collect(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.columns.len()
    }

    pub fn field_type(&self, i: usize) -> FieldType {
        self.columns[i].field_type
    }

    pub fn field_name(&self, i: usize) -> &str {
        &self.columns[i].name
    }

    /// Index of the column with the given name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Total on-disk width of one tuple of this descriptor.
    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(|c| c.field_type.byte_size()).sum()
    }

    /// Concatenation of two descriptors, left columns first.
    pub fn merge(left: &TupleDesc, right: &TupleDesc) -> TupleDesc {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().cloned());
        TupleDesc { columns }
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_names() {
        let a = TupleDesc::new(vec![
            ColumnDef::new("id", FieldType::Int),
            ColumnDef::new("name", FieldType::Str),
        ]);
        let b = TupleDesc::with_types(&[FieldType::Int, FieldType::Str]);
        assert_eq!(a, b);

        let c = TupleDesc::with_types(&[FieldType::Str, FieldType::Int]);
        assert_ne!(a, c);
    }

    #[test]
    fn byte_size_sums_field_widths() {
        let d = TupleDesc::with_types(&[FieldType::Int, FieldType::Int, FieldType::Str]);
        assert_eq!(d.byte_size(), 4 + 4 + 4 + STRING_LEN);
    }

    #[test]
    fn merge_concatenates_columns() {
        let a = TupleDesc::with_types(&[FieldType::Int]);
        let b = TupleDesc::with_types(&[FieldType::Str, FieldType::Int]);
        let m = TupleDesc::merge(&a, &b);
        assert_eq!(m.num_fields(), 3);
        assert_eq!(m.field_type(0), FieldType::Int);
        assert_eq!(m.field_type(1), FieldType::Str);
    }

    #[test]
    fn field_index_finds_named_column() {
        let d = TupleDesc::new(vec![
            ColumnDef::new("id", FieldType::Int),
            ColumnDef::new("name", FieldType::Str),
        ]);
        assert_eq!(d.field_index("name"), Some(1));
        assert_eq!(d.field_index("missing"), None);
    }
}
