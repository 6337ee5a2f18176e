//! A `DataFile` is one entity's exported rows, newline-delimited JSON, one
//! `Record` per line in the order they were exported. Field order within
//! each line is deterministic (`Record`'s serializer walks its sorted
//! key map), which is what makes the manifest checksum meaningful.

use std::fs;
use std::path::Path;

use crate::error::{CoreError, CoreResult};
use crate::value::Record;

/// Render an entity's records as canonical NDJSON bytes, the same bytes
/// both [`write_data_file`] and the manifest checksum are computed over.
pub fn canonical_bytes(records: &[Record]) -> CoreResult<Vec<u8>> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

pub fn write_data_file(path: &Path, records: &[Record]) -> CoreResult<()> {
    let bytes = canonical_bytes(records)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_data_file(path: &Path) -> CoreResult<Vec<Record>> {
    let data = fs::read_to_string(path)?;
    data.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect::<CoreResult<Vec<Record>>>()
        .map_err(|e: CoreError| e.with_target(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn record_named(name: &str) -> Record {
        let mut r = Record::new();
        r.insert("name", Value::string(name));
        r
    }

    #[test]
    fn write_then_read_round_trips_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("account.ndjson");
        let records = vec![record_named("a"), record_named("b"), record_named("c")];

        write_data_file(&path, &records).unwrap();
        let read_back = read_data_file(&path).unwrap();

        assert_eq!(read_back.len(), 3);
        for (original, loaded) in records.iter().zip(read_back.iter()) {
            assert_eq!(original.get("name"), loaded.get("name"));
        }
    }

    #[test]
    fn canonical_bytes_are_deterministic_across_calls() {
        let records = vec![record_named("a"), record_named("b")];
        assert_eq!(canonical_bytes(&records).unwrap(), canonical_bytes(&records).unwrap());
    }
}
