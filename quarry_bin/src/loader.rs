//! Loads a JSON schema file and registers its tables with the catalog.
//!
//! ```json
//! {
//!   "tables": [
//!     { "name": "r", "file": "r.dat",
//!       "columns": [ { "name": "id", "type": "int" },
//!                    { "name": "label", "type": "str" } ] }
//!   ]
//! }
//! ```
//!
//! Table files are resolved relative to the schema file's directory.

use crate::errors::QuarryError;
use log::debug;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use strata::{Catalog, ColumnDef, FieldType, HeapFile, TupleDesc};

#[derive(Debug, Deserialize)]
pub struct SchemaFile {
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub file: String,
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: FieldType,
}

/// Registers every table named by the schema file, creating missing data
/// files, and returns the table names in file order.
pub fn load_schema(schema_path: &Path, catalog: &Catalog) -> Result<Vec<String>, QuarryError> {
    let data_dir = schema_path.parent().unwrap_or_else(|| Path::new("."));
    let reader = BufReader::new(File::open(schema_path)?);
    let schema: SchemaFile = serde_json::from_reader(reader)?;

    let mut names = Vec::with_capacity(schema.tables.len());
    for table in schema.tables {
        if table.columns.is_empty() {
            return Err(QuarryError::Usage(format!(
                "table {} declares no columns",
                table.name
            )));
        }
        let desc = TupleDesc::new(
            table
                .columns
                .iter()
                .map(|c| ColumnDef::new(c.name.clone(), c.column_type))
                .collect(),
        );
        let file = HeapFile::open(data_dir.join(&table.file), desc)?;
        debug!("[loader] table {} -> {}", table.name, file.id());
        catalog.add_table(Arc::new(file), &table.name);
        names.push(table.name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_tables_and_descriptors() {
        let dir = tempdir().unwrap();
        let schema = dir.path().join("schema.json");
        std::fs::write(
            &schema,
            r#"{ "tables": [
                { "name": "r", "file": "r.dat",
                  "columns": [ { "name": "id", "type": "int" },
                               { "name": "label", "type": "str" } ] }
            ] }"#,
        )
        .unwrap();

        let catalog = Catalog::new();
        let names = load_schema(&schema, &catalog).unwrap();
        assert_eq!(names, vec!["r".to_string()]);

        let id = catalog.table_id("r").unwrap();
        let desc = catalog.tuple_desc(id).unwrap();
        assert_eq!(desc.num_fields(), 2);
        assert_eq!(desc.field_type(0), FieldType::Int);
        assert_eq!(desc.field_type(1), FieldType::Str);
        assert!(dir.path().join("r.dat").exists());
    }

    #[test]
    fn empty_column_list_is_rejected() {
        let dir = tempdir().unwrap();
        let schema = dir.path().join("schema.json");
        std::fs::write(
            &schema,
            r#"{ "tables": [ { "name": "r", "file": "r.dat", "columns": [] } ] }"#,
        )
        .unwrap();

        let catalog = Catalog::new();
        assert!(matches!(
            load_schema(&schema, &catalog),
            Err(QuarryError::Usage(_))
        ));
    }
}
