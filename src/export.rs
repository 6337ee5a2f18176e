//! # Parallel Exporter
//!
//! Drives the C7 plan across a bounded pool of leased clients. Entities
//! become eligible the moment their own dependencies (not their whole tier)
//! have finished, so a tier never blocks unrelated siblings just because one
//! entity in it is slow. Parallelism is bounded implicitly by the pool's
//! lease semaphore — no separate worker-count knob exists here.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::fetchxml::{self, FetchOptions, FetchXmlTransport};
use crate::graph::{Graph, Plan};
use crate::pool::{Pool, SeedFactory};
use crate::progress::{Event, ProgressSink};
use crate::value::Record;

/// Receives exported batches. Returning `Ok(false)` signals a fatal,
/// unrecoverable sink condition (e.g. disk full): the whole export stops
/// and in-flight siblings are cancelled. An `Err` propagates as-is.
#[async_trait]
pub trait ExportSink: Send + Sync {
    async fn write(&self, entity: &str, batch: Vec<Record>) -> CoreResult<bool>;
}

struct Readiness {
    completed: Mutex<HashSet<String>>,
    notify: tokio::sync::Notify,
}

impl Readiness {
    fn new() -> Self {
        Readiness {
            completed: Mutex::new(HashSet::new()),
            notify: tokio::sync::Notify::new(),
        }
    }

    async fn wait_for(&self, deps: &BTreeSet<String>) {
        loop {
            if deps.iter().all(|d| self.completed.lock().unwrap().contains(d)) {
                return;
            }
            self.notify.notified().await;
        }
    }

    fn mark_done(&self, entity: &str) {
        self.completed.lock().unwrap().insert(entity.to_string());
        self.notify.notify_waiters();
    }
}

/// Export one entity to completion: pages via C5, buffers rows into
/// `batch_size` chunks, flushes to `sink`, surfaces `Throttled` by
/// surrendering the lease and backing off rather than holding it idle.
async fn export_entity<F>(
    pool: &Pool<F>,
    entity: &str,
    fetch_xml: &str,
    batch_size: usize,
    sink: &dyn ExportSink,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> CoreResult<usize>
where
    F: SeedFactory,
    F::Client: FetchXmlTransport,
{
    let mut page_number = 1u32;
    let mut cookie: Option<String> = None;
    let mut buffer: Vec<Record> = Vec::new();
    let mut total = 0usize;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(CoreError::cancelled().with_details(format!("export of {entity} cancelled")));
        }

        let opts = FetchOptions {
            page_number: Some(page_number),
            paging_cookie: cookie.clone(),
            include_count: false,
        };

        let lease = pool.get_lease(cancel).await?;
        let page_result = fetchxml::retrieve_page(lease.client(), fetch_xml, &opts, cancel).await;
        drop(lease);

        match page_result {
            Ok(page) => {
                attempt = 0;
                let emitted = page.records.len();
                total += emitted;
                buffer.extend(page.records);
                progress.report(Event::ExportPageEmitted {
                    entity: entity.to_string(),
                    emitted_rows: emitted,
                    page_number,
                    more_records: page.more_records,
                });

                while buffer.len() >= batch_size {
                    let batch: Vec<Record> = buffer.drain(..batch_size).collect();
                    if !sink.write(entity, batch).await? {
                        cancel.cancel();
                        return Err(CoreError::fatal(format!("export sink rejected batch for {entity}")));
                    }
                }

                if !page.more_records {
                    break;
                }
                cookie = page.paging_cookie;
                page_number += 1;
            }
            Err(err) if err.code == ErrorCode::Throttled => {
                attempt += 1;
                let wait = pool.record_throttle(entity, None, attempt).await;
                warn!(entity, attempt, wait_ms = wait.as_millis() as u64, "export page throttled, backing off");
                tokio::time::sleep(wait).await;
            }
            Err(err) => return Err(err),
        }
    }

    if !buffer.is_empty() {
        if !sink.write(entity, std::mem::take(&mut buffer)).await? {
            cancel.cancel();
            return Err(CoreError::fatal(format!("export sink rejected final batch for {entity}")));
        }
    }

    progress.report(Event::EntityCompleted {
        entity: entity.to_string(),
        total_rows: total,
    });
    Ok(total)
}

/// Export the entire plan. Entities race for leases as soon as their own
/// dependencies complete; tiers exist only to seed readiness gating and the
/// `TierStarted` narration, not as hard barriers.
pub async fn export<F>(
    graph: &Graph,
    plan: &Plan,
    fetch_xml: &BTreeMap<String, String>,
    pool: Pool<F>,
    sink: Arc<dyn ExportSink>,
    progress: Arc<dyn ProgressSink>,
    batch_size: usize,
    cancel: CancellationToken,
) -> CoreResult<BTreeMap<String, usize>>
where
    F: SeedFactory + 'static,
    F::Client: FetchXmlTransport,
{
    let readiness = Arc::new(Readiness::new());
    let totals: Arc<Mutex<BTreeMap<String, usize>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let deps: HashMap<String, BTreeSet<String>> =
        graph.entities.iter().map(|e| (e.name.clone(), graph.dependencies_of(&e.name))).collect();

    let mut handles = Vec::new();
    for (tier_index, tier) in plan.tiers.iter().enumerate() {
        progress.report(Event::TierStarted {
            tier_index,
            entities: tier.entities.clone(),
        });

        for entity in &tier.entities {
            let Some(fetch) = fetch_xml.get(entity).cloned() else {
                warn!(entity, "no FetchXML supplied for planned entity, skipping");
                continue;
            };
            let my_deps = deps.get(entity).cloned().unwrap_or_default();
            let readiness = readiness.clone();
            let totals = totals.clone();
            let pool = pool.clone();
            let sink = sink.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            let entity = entity.clone();

            handles.push(tokio::spawn(async move {
                readiness.wait_for(&my_deps).await;
                let result = export_entity(&pool, &entity, &fetch, batch_size, sink.as_ref(), progress.as_ref(), &cancel).await;
                if let Ok(count) = &result {
                    totals.lock().unwrap().insert(entity.clone(), *count);
                }
                readiness.mark_done(&entity);
                result
            }));
        }
    }

    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    first_error = Some(CoreError::fatal(format!("export worker panicked: {join_err}")));
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let totals = totals.lock().unwrap().clone();
    info!(entities = totals.len(), "export complete");
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SchemaEntity;
    use crate::progress::RecordingSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct FakeClient {
        pages: Arc<Mutex<Vec<(Vec<&'static str>, bool)>>>,
    }

    #[async_trait]
    impl FetchXmlTransport for FakeClient {
        async fn retrieve_multiple(&self, _fetch_xml: &str, _cancel: &CancellationToken) -> CoreResult<fetchxml::RawPage> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(fetchxml::RawPage { rows: vec![], more_records: false, paging_cookie: None, total_record_count: None });
            }
            let (names, more) = pages.remove(0);
            let rows = names
                .into_iter()
                .map(|n| {
                    let mut row = fetchxml::RawRow::new();
                    row.fields.insert("name".to_string(), fetchxml::RawValue::Text(n.to_string()));
                    row
                })
                .collect();
            Ok(fetchxml::RawPage {
                rows,
                more_records: more,
                paging_cookie: if more { Some("c".into()) } else { None },
                total_record_count: None,
            })
        }
    }

    struct FakeFactory {
        client: FakeClient,
    }

    #[async_trait]
    impl SeedFactory for FakeFactory {
        type Client = FakeClient;
        async fn create(&self) -> CoreResult<FakeClient> {
            Ok(self.client.clone())
        }
    }

    struct CountingSink {
        rows: AtomicUsize,
    }

    #[async_trait]
    impl ExportSink for CountingSink {
        async fn write(&self, _entity: &str, batch: Vec<Record>) -> CoreResult<bool> {
            self.rows.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn single_entity_export_flushes_all_batches() {
        let factory = FakeFactory {
            client: FakeClient {
                pages: Arc::new(Mutex::new(vec![(vec!["a", "b"], true), (vec!["c"], false)])),
            },
        };
        let pool = Pool::init(factory, Some(2), None).await;
        let graph = crate::graph::build(&[SchemaEntity { name: "account".into(), primary_key: "accountid".into(), lookups: vec![] }]);
        let plan = crate::graph::plan(&graph).unwrap();
        let mut fetch_xml = BTreeMap::new();
        fetch_xml.insert("account".to_string(), r#"<fetch><entity name="account"><attribute name="name"/></entity></fetch>"#.to_string());
        let sink = Arc::new(CountingSink { rows: AtomicUsize::new(0) });
        let progress = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();

        let totals = export(&graph, &plan, &fetch_xml, pool, sink.clone(), progress.clone(), 500, cancel)
            .await
            .unwrap();

        assert_eq!(totals.get("account"), Some(&3));
        assert_eq!(sink.rows.load(Ordering::SeqCst), 3);
        let events = progress.events();
        assert!(events.iter().any(|e| matches!(e, Event::EntityCompleted { entity, total_rows } if entity == "account" && *total_rows == 3)));
    }

    #[tokio::test]
    async fn dependent_entity_waits_for_its_dependency() {
        let factory = FakeFactory {
            client: FakeClient { pages: Arc::new(Mutex::new(vec![(vec!["x"], false)])) },
        };
        let pool = Pool::init(factory, Some(2), None).await;
        let parent = SchemaEntity { name: "account".into(), primary_key: "accountid".into(), lookups: vec![] };
        let child = SchemaEntity {
            name: "contact".into(),
            primary_key: "contactid".into(),
            lookups: vec![("parentcustomerid".into(), "account".into())],
        };
        let graph = crate::graph::build(&[parent, child]);
        let plan = crate::graph::plan(&graph).unwrap();
        assert_eq!(plan.tiers.len(), 2);

        let mut fetch_xml = BTreeMap::new();
        fetch_xml.insert("account".to_string(), r#"<fetch><entity name="account"><attribute name="name"/></entity></fetch>"#.to_string());
        fetch_xml.insert("contact".to_string(), r#"<fetch><entity name="contact"><attribute name="name"/></entity></fetch>"#.to_string());
        let sink = Arc::new(CountingSink { rows: AtomicUsize::new(0) });
        let progress = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();

        let totals = export(&graph, &plan, &fetch_xml, pool, sink, progress, 500, cancel).await.unwrap();
        assert_eq!(totals.len(), 2);
    }

    #[tokio::test]
    async fn fatal_sink_response_cancels_export() {
        struct FatalSink;
        #[async_trait]
        impl ExportSink for FatalSink {
            async fn write(&self, _entity: &str, _batch: Vec<Record>) -> CoreResult<bool> {
                Ok(false)
            }
        }
        let factory = FakeFactory {
            client: FakeClient { pages: Arc::new(Mutex::new(vec![(vec!["a"], false)])) },
        };
        let pool = Pool::init(factory, Some(1), None).await;
        let graph = crate::graph::build(&[SchemaEntity { name: "account".into(), primary_key: "accountid".into(), lookups: vec![] }]);
        let plan = crate::graph::plan(&graph).unwrap();
        let mut fetch_xml = BTreeMap::new();
        fetch_xml.insert("account".to_string(), r#"<fetch><entity name="account"><attribute name="name"/></entity></fetch>"#.to_string());
        let sink = Arc::new(FatalSink);
        let progress = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();

        let err = export(&graph, &plan, &fetch_xml, pool, sink, progress, 500, cancel).await.unwrap_err();
        assert_eq!(err.code.as_str(), "Fatal");
    }
}
