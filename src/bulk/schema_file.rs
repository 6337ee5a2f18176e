//! The schema file carries the entity definitions (primary keys, lookup
//! fields) a transfer was planned against, so an importer can rebuild the
//! same [`Graph`](crate::graph::Graph) without re-deriving it from a live
//! metadata source.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::graph::SchemaEntity;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFile {
    pub entities: Vec<SchemaEntity>,
}

pub fn write_schema_file(path: &Path, schema: &SchemaFile) -> CoreResult<()> {
    let json = serde_json::to_string_pretty(schema)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_schema_file(path: &Path) -> CoreResult<SchemaFile> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
