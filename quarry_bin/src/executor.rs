//! Volcano-style operators over the storage core's tuple-source contract.

pub mod dml;
pub mod filter;
pub mod scan;

pub use dml::{Delete, Insert};
pub use filter::{Filter, Op, Predicate};
pub use scan::SeqScan;
