//! # FetchXML Executor
//!
//! Rewrites a FetchXML document per the paging rules, extracts columns,
//! drives the platform's Web API transport page by page, and maps raw rows
//! into the C1 [`crate::value::Record`] model.

pub mod columns;
pub mod doc;
pub mod mapping;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult};
use crate::value::{Column, QueryResult, Record};

pub use columns::{extract_columns, infer_all_attribute_columns};
pub use doc::{parse, Element};
pub use mapping::{map_record, RawRow, RawValue};
pub use rewrite::{rewrite, FetchOptions};

mod rewrite;

const DEFAULT_MAX_RECORDS: usize = 5000;

/// One page as returned by the Web API collaborator.
pub struct RawPage {
    pub rows: Vec<RawRow>,
    pub more_records: bool,
    pub paging_cookie: Option<String>,
    pub total_record_count: Option<u64>,
}

/// The Web API transport collaborator. Supplied by the caller; this crate
/// owns only the rewrite/mapping/paging logic layered on top of it.
#[async_trait]
pub trait FetchXmlTransport: Send + Sync {
    async fn retrieve_multiple(&self, fetch_xml: &str, cancel: &CancellationToken) -> CoreResult<RawPage>;
}

fn entity_name(root: &Element) -> CoreResult<String> {
    root.first_child_named("entity")
        .and_then(|e| e.attr("name"))
        .map(|s| s.to_string())
        .ok_or_else(|| CoreError::new(crate::error::ErrorCode::InvalidFetchXml, "missing entity name"))
}

fn primary_id_field(entity: &str) -> String {
    format!("{entity}id")
}

/// Drive a single page retrieval: parse, rewrite, serialize, call the
/// transport, and map the result into a [`QueryResult`].
pub async fn retrieve_page<T: FetchXmlTransport>(
    transport: &T,
    fetch_xml: &str,
    opts: &FetchOptions,
    cancel: &CancellationToken,
) -> CoreResult<QueryResult> {
    let mut root = doc::parse(fetch_xml)?;
    let entity = entity_name(&root)?;
    rewrite::rewrite(&mut root, opts);
    let serialized = root.to_stable_xml();
    debug!(entity = %entity, page = opts.page_number, "executing FetchXML page");

    let entity_el = root.first_child_named("entity").expect("validated by parse()");
    let all_attributes = entity_el.first_child_named("all-attributes").is_some();
    let columns = columns::extract_columns(entity_el);
    let primary_id = primary_id_field(&entity);

    let page = transport.retrieve_multiple(&serialized, cancel).await?;
    let mut records: Vec<Record> = page
        .rows
        .iter()
        .map(|row| mapping::map_record(row, &columns, &primary_id))
        .collect();

    let columns = if all_attributes {
        let inferred = columns::infer_all_attribute_columns(&records);
        // Re-map so every record carries every inferred key (Null where
        // the server omitted it), matching the "key absent ⇒ Null" rule.
        records = page
            .rows
            .iter()
            .map(|row| mapping::map_record(row, &inferred, &primary_id))
            .collect();
        inferred
    } else {
        columns
    };

    let mut result = QueryResult::new(entity, columns, records);
    result.more_records = page.more_records;
    result.paging_cookie = page.paging_cookie;
    result.total_count = page.total_record_count;
    result.page_number = opts.page_number.unwrap_or(1);
    result.executed_fetch = Some(serialized);
    Ok(result)
}

/// Iterate pages until `!moreRecords` or `len(accumulated) >= max_records`
/// (default 5000), carrying the paging cookie between calls and retaining
/// the first page's columns.
pub async fn all_pages<T: FetchXmlTransport>(
    transport: &T,
    fetch_xml: &str,
    max_records: Option<usize>,
    cancel: &CancellationToken,
) -> CoreResult<QueryResult> {
    let max_records = max_records.unwrap_or(DEFAULT_MAX_RECORDS);
    let mut page_number = 1u32;
    let mut cookie: Option<String> = None;
    let mut accumulated: Vec<Record> = Vec::new();
    let mut first_columns: Option<Vec<Column>> = None;
    let mut entity_logical_name = String::new();
    let mut total_count = None;

    loop {
        if cancel.is_cancelled() {
            return Err(CoreError::cancelled().with_details("AllPages cancelled"));
        }

        let opts = FetchOptions {
            page_number: Some(page_number),
            paging_cookie: cookie.clone(),
            include_count: page_number == 1,
        };
        let page = retrieve_page(transport, fetch_xml, &opts, cancel).await?;
        entity_logical_name = page.entity_logical_name.clone();
        if first_columns.is_none() {
            first_columns = Some(page.columns.clone());
        }
        total_count = total_count.or(page.total_count);
        accumulated.extend(page.records);

        let more = page.more_records && accumulated.len() < max_records;
        if !more {
            info!(entity = %entity_logical_name, rows = accumulated.len(), "FetchXML AllPages complete");
            let mut result = QueryResult::new(entity_logical_name, first_columns.unwrap_or_default(), accumulated);
            result.more_records = page.more_records && result.count >= max_records;
            result.total_count = total_count;
            return Ok(result);
        }

        cookie = page.paging_cookie;
        page_number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixturePages {
        pages: Mutex<Vec<RawPage>>,
    }

    fn row_with_name(name: &str) -> RawRow {
        let mut row = RawRow::new();
        row.fields.insert("name".to_string(), RawValue::Text(name.to_string()));
        row
    }

    #[async_trait]
    impl FetchXmlTransport for FixturePages {
        async fn retrieve_multiple(&self, _fetch_xml: &str, _cancel: &CancellationToken) -> CoreResult<RawPage> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(RawPage {
                    rows: vec![],
                    more_records: false,
                    paging_cookie: None,
                    total_record_count: None,
                });
            }
            Ok(pages.remove(0))
        }
    }

    fn page(rows: Vec<RawRow>, more: bool) -> RawPage {
        RawPage {
            rows,
            more_records: more,
            paging_cookie: if more { Some("cookie".into()) } else { None },
            total_record_count: None,
        }
    }

    #[tokio::test]
    async fn all_pages_accumulates_across_three_pages() {
        let transport = FixturePages {
            pages: Mutex::new(vec![
                page(vec![row_with_name("a"), row_with_name("b")], true),
                page(vec![row_with_name("c"), row_with_name("d")], true),
                page(vec![row_with_name("e"), row_with_name("f")], false),
            ]),
        };
        let fetch = r#"<fetch><entity name="account"><attribute name="name"/></entity></fetch>"#;
        let cancel = CancellationToken::new();
        let result = all_pages(&transport, fetch, None, &cancel).await.unwrap();
        assert_eq!(result.count, 6);
        assert!(!result.more_records);
    }

    #[tokio::test]
    async fn all_pages_stops_at_max_records() {
        let transport = FixturePages {
            pages: Mutex::new(vec![
                page(vec![row_with_name("a"), row_with_name("b")], true),
                page(vec![row_with_name("c"), row_with_name("d")], true),
            ]),
        };
        let fetch = r#"<fetch><entity name="account"><attribute name="name"/></entity></fetch>"#;
        let cancel = CancellationToken::new();
        let result = all_pages(&transport, fetch, Some(3), &cancel).await.unwrap();
        assert!(result.count >= 3);
    }

    #[tokio::test]
    async fn cancelled_before_start_faults() {
        let transport = FixturePages { pages: Mutex::new(vec![]) };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let fetch = r#"<fetch><entity name="account"><attribute name="name"/></entity></fetch>"#;
        let err = all_pages(&transport, fetch, None, &cancel).await.unwrap_err();
        assert_eq!(err.code.as_str(), "Cancelled");
    }
}
