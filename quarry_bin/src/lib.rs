//! Operator layer and CLI driver for the Quarry database: volcano-style
//! executors over the storage core's cursor contract, plus the schema-file
//! loader that populates the catalog.

pub mod errors;
pub mod executor;
pub mod loader;
