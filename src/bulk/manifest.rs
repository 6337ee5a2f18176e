//! The manifest lists every entity in a bulk transfer with its row count
//! and a SHA-256 checksum of its `DataFile`'s canonical-ordered bytes, so a
//! receiver can verify a transfer landed intact before importing it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreResult;
use crate::value::Record;

use super::data_file::canonical_bytes;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub entity: String,
    pub row_count: usize,
    pub checksum: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Build a manifest over an export's per-entity record sets, in entity-name
/// order (the map is already sorted since it's keyed by `BTreeMap`).
pub fn build_manifest(entity_rows: &BTreeMap<String, Vec<Record>>) -> CoreResult<Manifest> {
    let mut entries = Vec::with_capacity(entity_rows.len());
    for (entity, records) in entity_rows {
        let bytes = canonical_bytes(records)?;
        entries.push(ManifestEntry {
            entity: entity.clone(),
            row_count: records.len(),
            checksum: sha256_hex(&bytes),
        });
    }
    Ok(Manifest { entries })
}

pub fn write_manifest(path: &Path, manifest: &Manifest) -> CoreResult<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> CoreResult<Manifest> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
