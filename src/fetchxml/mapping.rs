//! Mapping of raw server payloads into the C1 [`Value`]/[`Record`] model
//! (the executor). The concrete Web API transport is an external collaborator; this
//! module only defines the shape a transport must hand back ([`RawValue`],
//! [`RawRow`]) and the mapping rules applied to it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::value::{Column, Record, Value};

/// A single cell as returned by the platform's Web API, before mapping
/// into the closed [`Value`] model.
#[derive(Clone, Debug)]
pub enum RawValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    Money(Decimal),
    EntityReference {
        id: Uuid,
        entity_name: String,
        name: Option<String>,
    },
    OptionSetValue {
        value: i32,
        label: Option<String>,
    },
    OptionSetValueCollection(Vec<(i32, Option<String>)>),
    /// `AliasedValue` wraps a value produced through a `<link-entity>`;
    /// the key it's stored under in [`RawRow::fields`] is already
    /// `alias.logicalname`, so unwrapping just discards the envelope.
    AliasedValue {
        alias: String,
        logical_name: String,
        value: Box<RawValue>,
    },
}

/// One row as returned by the transport: fields keyed by
/// `alias.logicalname` (linked) or `logicalname` (local), plus an
/// optional formatted-value string per key.
#[derive(Clone, Debug, Default)]
pub struct RawRow {
    pub fields: BTreeMap<String, RawValue>,
    pub formatted: BTreeMap<String, String>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unwrap_aliased(value: &RawValue) -> &RawValue {
    match value {
        RawValue::AliasedValue { value, .. } => unwrap_aliased(value),
        other => other,
    }
}

fn raw_to_value(raw: &RawValue) -> Value {
    match raw {
        RawValue::Null => Value::Null,
        RawValue::Text(s) => Value::string(s.clone()),
        RawValue::Int(n) => Value::int(*n),
        RawValue::Float(f) => Value::Simple(crate::value::Simple::Float(*f)),
        RawValue::Bool(b) => Value::Simple(crate::value::Simple::Bool(*b)),
        RawValue::Guid(g) => Value::Simple(crate::value::Simple::Guid(*g)),
        RawValue::DateTime(dt) => Value::Simple(crate::value::Simple::DateTime(*dt)),
        RawValue::Money(amount) => Value::Money {
            amount: *amount,
            formatted: None,
        },
        RawValue::EntityReference { id, entity_name, name } => Value::Lookup {
            id: *id,
            entity_name: entity_name.clone(),
            display_name: name.clone(),
        },
        RawValue::OptionSetValue { value, label } => Value::OptionSet {
            code: *value,
            formatted: label.clone(),
        },
        RawValue::OptionSetValueCollection(items) => Value::OptionSetSet {
            codes: items.iter().map(|(c, _)| *c).collect(),
            formatted: {
                let labels: Vec<String> = items.iter().filter_map(|(_, l)| l.clone()).collect();
                if labels.is_empty() {
                    None
                } else {
                    Some(labels.join(", "))
                }
            },
        },
        RawValue::AliasedValue { value, .. } => raw_to_value(unwrap_aliased(value)),
    }
}

/// Map one raw row into a [`Record`] against the given columns, injecting
/// the primary id column if present in the row and not already mapped.
pub fn map_record(row: &RawRow, columns: &[Column], primary_id_field: &str) -> Record {
    let mut record = Record::new();

    for column in columns {
        let key = column.qualified_key();
        match row.fields.get(&key) {
            Some(raw) => {
                let value = raw_to_value(unwrap_aliased(raw));
                let value = match row.formatted.get(&key) {
                    Some(formatted) if !formatted.is_empty() => Value::formatted(value, formatted.clone()),
                    _ => value,
                };
                record.insert(&key, value);
            }
            None => record.insert(&key, Value::Null),
        }
    }

    if !primary_id_field.is_empty() && !record.contains_key(primary_id_field) {
        if let Some(raw) = row.fields.get(primary_id_field) {
            record.insert(primary_id_field, raw_to_value(unwrap_aliased(raw)));
        }
    }

    record
}
