use crate::error::{Error, Result};
use crate::heap_file::HeapFile;
use crate::schema::TupleDesc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct TableEntry {
    file: Arc<HeapFile>,
    name: String,
}

/// Registry of the tables known to a database instance. Read-only lookups by
/// table id or name; registration replaces any table with a clashing name.
#[derive(Default)]
pub struct Catalog {
    tables: Mutex<HashMap<u32, TableEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a heap file under the given name, returning its table id.
    pub fn add_table(&self, file: Arc<HeapFile>, name: &str) -> u32 {
        let id = file.id();
        let mut tables = self.tables.lock().unwrap();
        tables.retain(|_, e| e.name != name);
        tables.insert(
            id,
            TableEntry {
                file,
                name: name.to_string(),
            },
        );
        id
    }

    pub fn file(&self, table_id: u32) -> Result<Arc<HeapFile>> {
        self.tables
            .lock()
            .unwrap()
            .get(&table_id)
            .map(|e| e.file.clone())
            .ok_or(Error::NoSuchTable(table_id))
    }

    pub fn tuple_desc(&self, table_id: u32) -> Result<TupleDesc> {
        Ok(self.file(table_id)?.tuple_desc().clone())
    }

    pub fn table_id(&self, name: &str) -> Option<u32> {
        self.tables
            .lock()
            .unwrap()
            .iter()
            .find(|(_, e)| e.name == name)
            .map(|(&id, _)| id)
    }

    pub fn table_name(&self, table_id: u32) -> Result<String> {
        self.tables
            .lock()
            .unwrap()
            .get(&table_id)
            .map(|e| e.name.clone())
            .ok_or(Error::NoSuchTable(table_id))
    }

    pub fn table_ids(&self) -> Vec<u32> {
        self.tables.lock().unwrap().keys().copied().collect()
    }

    pub fn clear(&self) {
        self.tables.lock().unwrap().clear();
    }
}
