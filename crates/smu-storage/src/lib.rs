//! Persistence for characterization runs.
//!
//! Exports keep `sequence_index` order and carry the run metadata (test kind,
//! parameters, instrument identity, start time, outcome) as a header.

pub mod csv_writer;

pub use csv_writer::{default_file_name, export_csv, write_csv, COLUMNS};
