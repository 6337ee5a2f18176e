//! # Bulk Transfer File Formats
//!
//! Two portable formats, a `SchemaFile` and a per-entity `DataFile`, plus a
//! manifest tying them together. Only determinism and per-entity isolation
//! are required of the on-disk encoding; this crate picks newline-delimited
//! JSON, the same format the importer's dead-letter files use, so a single
//! "canonical bytes" notion (one `serde_json::to_string` per line, joined by
//! `\n`) backs both the manifest checksum and the on-disk rows.

pub mod data_file;
pub mod manifest;
pub mod schema_file;

pub use data_file::{read_data_file, write_data_file};
pub use manifest::{build_manifest, read_manifest, write_manifest, Manifest, ManifestEntry};
pub use schema_file::{read_schema_file, write_schema_file, SchemaFile};
