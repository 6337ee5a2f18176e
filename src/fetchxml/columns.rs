//! Column extraction from a FetchXML `<entity>` element, and the
//! all-attributes column inference pass run after paging completes.

use std::collections::BTreeSet;

use super::doc::Element;
use crate::value::{Column, Record};

/// Extract columns for the top-level entity (and recursively for every
/// `<link-entity>`). Returns `None` in the "all-attributes" slot to mean
/// "start empty, infer after paging".
pub fn extract_columns(entity: &Element) -> Vec<Column> {
    let mut columns = Vec::new();
    if entity.first_child_named("all-attributes").is_some() {
        return columns;
    }
    collect(entity, None, None, &mut columns);
    columns
}

fn collect(entity: &Element, linked_alias: Option<&str>, linked_name: Option<&str>, out: &mut Vec<Column>) {
    for attr in entity.children_named("attribute") {
        let logical_name = attr.attr("name").unwrap_or_default().to_string();
        let alias = attr.attr("alias").map(|s| s.to_string());
        let is_aggregate = attr.attr("aggregate").is_some();
        let aggregate_function = attr.attr("aggregate").map(|s| s.to_string());
        out.push(Column {
            logical_name,
            alias,
            linked_entity_alias: linked_alias.map(|s| s.to_string()),
            linked_entity_name: linked_name.map(|s| s.to_string()),
            is_aggregate,
            aggregate_function,
            data_type: None,
        });
    }

    for link in entity.children_named("link-entity") {
        let link_name = link.attr("name");
        let alias = link.attr("alias").or(link_name).map(|s| s.to_string());
        collect(link, alias.as_deref(), link_name, out);
    }
}

/// Union the key sets of all records, ordering entity-id-like keys first
/// (case-insensitively ends with "id"), then the remainder
/// ASCII-insensitively, producing `Unknown`-typed columns.
pub fn infer_all_attribute_columns(records: &[Record]) -> Vec<Column> {
    let mut keys: BTreeSet<String> = BTreeSet::new();
    for record in records {
        for key in record.keys() {
            keys.insert(key.to_string());
        }
    }

    let mut keys: Vec<String> = keys.into_iter().collect();
    keys.sort_by(|a, b| {
        let a_id = a.to_ascii_lowercase().ends_with("id");
        let b_id = b.to_ascii_lowercase().ends_with("id");
        match (a_id, b_id) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
        }
    });

    keys.into_iter()
        .map(|k| Column {
            logical_name: k,
            alias: None,
            linked_entity_alias: None,
            linked_entity_name: None,
            is_aggregate: false,
            aggregate_function: None,
            data_type: Some("Unknown".to_string()),
        })
        .collect()
}
