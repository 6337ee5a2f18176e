//! # Configuration knobs
//!
//! The core never parses `std::env` or a config file itself — collaborators
//! (CLI flags, env vars, JSON config) build a [`CoreConfig`] however they
//! like and pass it in. `dotenvy` is a dev-only convenience for loading
//! `.env` in integration tests against a live endpoint; it is not used here.

/// Degree-of-parallelism and protocol knobs, with the documented defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct CoreConfig {
    /// Pool's adaptive DOP ceiling. Default 4.
    pub max_concurrent: u32,
    /// FetchXML page size / `AllPages` record cap. Default 5000.
    pub page_size: usize,
    /// Exporter batch size. Default 500.
    pub batch_size: usize,
    /// `ExecuteSql` row cap, `None` = unbounded.
    pub max_rows: Option<usize>,
    /// TDS endpoint port. Default 5558.
    pub tds_port: u16,
    /// Bounded time budget for the one-shot DOP probe. Default 2000ms.
    pub probe_timeout_ms: u64,
    /// Per-record import retry cap. Default 5.
    pub retry_cap: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            max_concurrent: 4,
            page_size: 5000,
            batch_size: 500,
            max_rows: None,
            tds_port: 5558,
            probe_timeout_ms: 2000,
            retry_cap: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = CoreConfig::default();
        assert_eq!(c.max_concurrent, 4);
        assert_eq!(c.page_size, 5000);
        assert_eq!(c.batch_size, 500);
        assert_eq!(c.tds_port, 5558);
        assert_eq!(c.retry_cap, 5);
    }
}
