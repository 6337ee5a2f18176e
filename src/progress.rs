//! # Progress Sink & Structured Events
//!
//! The bulk engine never owns a UI or a WebSocket server — it pushes
//! structured [`Event`]s to a caller-supplied [`ProgressSink`]. Every event
//! is also logged via `tracing`, so the operational log and the caller's
//! own sink both see the same stream without coupling the engine to any
//! particular UI.

use tracing::{info, warn};

/// Classification attached to a `Failure` event, mirroring the importer's
/// retry-classification taxonomy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Throttled,
    AuthFailed,
    ValidationFailed,
    FatalEntity,
}

/// Structured events pushed by the exporter and importer.
#[derive(Clone, Debug)]
pub enum Event {
    ExportPageEmitted {
        entity: String,
        emitted_rows: usize,
        page_number: u32,
        more_records: bool,
    },
    EntityCompleted {
        entity: String,
        total_rows: usize,
    },
    TierStarted {
        tier_index: usize,
        entities: Vec<String>,
    },
    ImportBatchApplied {
        entity: String,
        batch_index: usize,
        applied_rows: usize,
    },
    Failure {
        classification: FailureClass,
        entity: Option<String>,
        detail: String,
    },
    Checkpointed {
        entity: String,
        position: usize,
    },
}

/// A push interface for bulk-engine progress. Implementors decide how to
/// surface events (CLI progress bar, TUI dialog, log aggregator); the core
/// only ever calls [`ProgressSink::report`].
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: Event);
}

/// Reports every event through `tracing` and nothing else. The default for
/// callers that only want the operational log.
#[derive(Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn report(&self, event: Event) {
        log_event(&event);
    }
}

pub fn log_event(event: &Event) {
    match event {
        Event::ExportPageEmitted { entity, emitted_rows, page_number, more_records } => {
            info!(entity, emitted_rows, page_number, more_records, "export page emitted");
        }
        Event::EntityCompleted { entity, total_rows } => {
            info!(entity, total_rows, "entity export/import completed");
        }
        Event::TierStarted { tier_index, entities } => {
            info!(tier_index, entities = ?entities, "tier started");
        }
        Event::ImportBatchApplied { entity, batch_index, applied_rows } => {
            info!(entity, batch_index, applied_rows, "import batch applied");
        }
        Event::Failure { classification, entity, detail } => {
            warn!(?classification, entity, detail, "bulk engine failure");
        }
        Event::Checkpointed { entity, position } => {
            info!(entity, position, "checkpoint written");
        }
    }
}

/// An in-memory sink that records every event, handy for tests and for
/// collaborators that poll rather than push.
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn report(&self, event: Event) {
        log_event(&event);
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_collects_events_in_order() {
        let sink = RecordingSink::new();
        sink.report(Event::TierStarted { tier_index: 0, entities: vec!["account".into()] });
        sink.report(Event::EntityCompleted { entity: "account".into(), total_rows: 10 });
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::TierStarted { .. }));
        assert!(matches!(events[1], Event::EntityCompleted { .. }));
    }
}
