//! Source adapters. Each produces a [`RawBatch`](crate::pipeline::RawBatch)
//! and nothing more; validation happens downstream.

mod csv_export;

pub use csv_export::{CsvAdapterError, CsvExportAdapter};
