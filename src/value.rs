//! # Value & Column Model
//!
//! Typed cell values and column metadata shared by the FetchXML executor,
//! the TDS executor, and the function evaluator. Values and [`Record`]s are
//! immutable once produced; columns are produced once per [`QueryResult`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single discriminated cell. A non-null `Value` carries exactly one
/// payload variant. `Formatted.formatted` is never empty by construction —
/// use [`Value::formatted`] rather than constructing the variant directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Simple(Simple),
    Lookup {
        id: Uuid,
        entity_name: String,
        display_name: Option<String>,
    },
    OptionSet {
        code: i32,
        formatted: Option<String>,
    },
    OptionSetSet {
        codes: Vec<i32>,
        formatted: Option<String>,
    },
    Money {
        amount: Decimal,
        formatted: Option<String>,
    },
    Formatted {
        raw: Box<Value>,
        formatted: String,
    },
}

/// Primitive payloads carried by `Value::Simple`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Simple {
    String(String),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Simple(Simple::String(s.into()))
    }

    pub fn int(v: i64) -> Self {
        Value::Simple(Simple::Int(v))
    }

    pub fn formatted(raw: Value, formatted: impl Into<String>) -> Self {
        let formatted = formatted.into();
        debug_assert!(!formatted.is_empty(), "Formatted.formatted must not be empty");
        Value::Formatted {
            raw: Box::new(raw),
            formatted,
        }
    }

    /// The payload used for comparisons between variants: a `Formatted` value
    /// compares by its raw payload.
    fn comparable(&self) -> &Value {
        match self {
            Value::Formatted { raw, .. } => raw.comparable(),
            other => other,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use Simple::*;
        match (self.comparable(), other.comparable()) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Simple(a), Value::Simple(b)) => match (a, b) {
                (String(x), String(y)) => x.partial_cmp(y),
                (Int(x), Int(y)) => x.partial_cmp(y),
                (Float(x), Float(y)) => x.partial_cmp(y),
                (Decimal(x), Decimal(y)) => x.partial_cmp(y),
                (Bool(x), Bool(y)) => x.partial_cmp(y),
                (DateTime(x), DateTime(y)) => x.partial_cmp(y),
                (Guid(x), Guid(y)) => x.partial_cmp(y),
                (Int(x), Float(y)) => (*x as f64).partial_cmp(y),
                (Float(x), Int(y)) => x.partial_cmp(&(*y as f64)),
                _ => None,
            },
            (Value::Money { amount: a, .. }, Value::Money { amount: b, .. }) => a.partial_cmp(b),
            (Value::Lookup { id: a, .. }, Value::Lookup { id: b, .. }) => a.partial_cmp(b),
            (Value::OptionSet { code: a, .. }, Value::OptionSet { code: b, .. }) => {
                a.partial_cmp(b)
            }
            _ => None,
        }
    }
}

/// Column metadata. The *qualified key* used in a record map is `alias` if
/// present, else `linked_entity_alias.logical_name` if linked, else
/// `logical_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub logical_name: String,
    pub alias: Option<String>,
    pub linked_entity_alias: Option<String>,
    pub linked_entity_name: Option<String>,
    pub is_aggregate: bool,
    pub aggregate_function: Option<String>,
    pub data_type: Option<String>,
}

impl Column {
    pub fn simple(logical_name: impl Into<String>) -> Self {
        Column {
            logical_name: logical_name.into(),
            alias: None,
            linked_entity_alias: None,
            linked_entity_name: None,
            is_aggregate: false,
            aggregate_function: None,
            data_type: None,
        }
    }

    pub fn qualified_key(&self) -> String {
        if let Some(alias) = &self.alias {
            alias.clone()
        } else if let Some(linked) = &self.linked_entity_alias {
            format!("{linked}.{}", self.logical_name)
        } else {
            self.logical_name.clone()
        }
    }
}

/// A case-insensitive mapping from qualified key to `Value`. Nulls from the
/// server are omitted; readers should use [`Record::get`] so that "key
/// absent" and "key present but Null" both read back as `Value::Null`.
#[derive(Debug, Clone, Default)]
pub struct Record {
    // Keyed by lowercased qualified key; the original-case key is kept
    // alongside the value so callers can recover it if needed.
    cells: BTreeMap<String, (String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.cells.insert(key.to_ascii_lowercase(), (key, value));
    }

    /// Returns `Value::Null` for an absent key when `known` is true (the
    /// caller already knows the column exists), matching the
    /// "key absent ⇒ Null" rule. Returns `None` for a genuinely unknown key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.cells.get(&key.to_ascii_lowercase()).map(|(_, v)| v)
    }

    pub fn get_or_null(&self, key: &str) -> Value {
        self.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.cells.contains_key(&key.to_ascii_lowercase())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cells.values().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cells.values().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Serializes as `{originalCaseKey: value, ...}` in stable key order, the
/// wire shape `DataFile`'s NDJSON rows use — readers reconstruct a `Record`
/// by re-inserting each pair, which restores the lowercased lookup index.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (original_key, value) in self.cells.values() {
            map.serialize_entry(original_key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flat: BTreeMap<String, Value> = BTreeMap::deserialize(deserializer)?;
        let mut record = Record::new();
        for (key, value) in flat {
            record.insert(key, value);
        }
        Ok(record)
    }
}

/// The outcome of a single paged retrieve.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub entity_logical_name: String,
    pub columns: Vec<Column>,
    pub records: Vec<Record>,
    pub count: usize,
    pub total_count: Option<u64>,
    pub more_records: bool,
    pub paging_cookie: Option<String>,
    pub page_number: u32,
    pub elapsed_ms: u64,
    pub executed_fetch: Option<String>,
    pub is_aggregate: bool,
}

impl QueryResult {
    /// Builds a result, deriving `count` from `records.len()` and validating
    /// the `more_records ⇒ paging_cookie` invariant is the caller's to
    /// uphold (not silently repaired here) — violating it is a programming
    /// error in the executor, not a recoverable condition.
    pub fn new(entity_logical_name: impl Into<String>, columns: Vec<Column>, records: Vec<Record>) -> Self {
        let count = records.len();
        QueryResult {
            entity_logical_name: entity_logical_name.into(),
            columns,
            records,
            count,
            total_count: None,
            more_records: false,
            paging_cookie: None,
            page_number: 1,
            elapsed_ms: 0,
            executed_fetch: None,
            is_aggregate: false,
        }
    }
}
