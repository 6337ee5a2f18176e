//! # TDS Query Executor
//!
//! Authenticated SQL connection to the platform's read replica. Read-only:
//! rejects any statement whose first non-whitespace, non-comment keyword
//! isn't in the accept-list. Streams rows with a hard `maxRows` stop and
//! normalizes TDS types into the C1 [`crate::value::Value`] model.
//!
//! The wire connection itself is behind [`TdsTransport`] so the
//! accept-list/normalization logic is unit-testable without a live server,
//! the same split used by the FetchXML executor's [`crate::fetchxml::FetchXmlTransport`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::pool::{Pool, SeedFactory};
use crate::value::{Column, QueryResult, Record, Simple, Value};
use crate::variables::VariableScope;

/// Statement-leading keywords permitted by the read-only accept-list.
const ACCEPT_LIST: &[&str] = &["SELECT", "WITH", "DECLARE", "SET", "IF", "BEGIN", "TRY"];

/// Strip leading whitespace and `--`/`/* */` comments, returning the
/// remainder of the statement starting at its first real token.
pub fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(stripped) = trimmed.strip_prefix("--") {
            rest = match stripped.find('\n') {
                Some(i) => &stripped[i + 1..],
                None => "",
            };
            continue;
        }
        if let Some(stripped) = trimmed.strip_prefix("/*") {
            rest = match stripped.find("*/") {
                Some(i) => &stripped[i + 2..],
                None => "",
            };
            continue;
        }
        return trimmed;
    }
}

fn first_keyword(sql: &str) -> Option<String> {
    let rest = strip_leading_comments(sql);
    let word: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if word.is_empty() {
        None
    } else {
        Some(word.to_ascii_uppercase())
    }
}

/// Fault `InvalidArguments` unless the statement's first real keyword is
/// on the read-only accept-list.
pub fn check_read_only(sql: &str) -> CoreResult<()> {
    match first_keyword(sql) {
        Some(kw) if ACCEPT_LIST.contains(&kw.as_str()) => Ok(()),
        Some(kw) => Err(CoreError::invalid_arguments(format!("statement keyword '{kw}' is not permitted (read-only)"))
            .with_target("sql")),
        None => Err(CoreError::invalid_arguments("empty SQL statement").with_target("sql")),
    }
}

/// Mapped column type, read from the protocol's row descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryColumnType {
    Guid,
    DateTime,
    Decimal,
    Money,
    Int,
    Bool,
    String,
    Unknown,
}

/// One wire-level cell, already separated from its raw protocol encoding by
/// the transport, ready for normalization into a [`Value`].
#[derive(Clone, Debug)]
pub enum WireCell {
    Null,
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    Decimal(Decimal),
    Money(Decimal),
    Int(i64),
    Bool(bool),
    String(String),
    /// Unknown vendor type: degrades to `Simple(rawString)`.
    Raw(String),
}

pub fn normalize(cell: &WireCell) -> Value {
    match cell {
        WireCell::Null => Value::Null,
        WireCell::Guid(g) => Value::Simple(Simple::Guid(*g)),
        WireCell::DateTime(dt) => Value::Simple(Simple::DateTime(*dt)),
        WireCell::Decimal(d) => Value::Simple(Simple::Decimal(*d)),
        WireCell::Money(d) => Value::Money { amount: *d, formatted: None },
        WireCell::Int(n) => Value::int(*n),
        WireCell::Bool(b) => Value::Simple(Simple::Bool(*b)),
        WireCell::String(s) => Value::string(s.clone()),
        WireCell::Raw(s) => Value::string(s.clone()),
    }
}

/// One streamed row: values aligned with the executed statement's columns.
pub struct WireRow {
    pub cells: Vec<WireCell>,
}

/// One streamed result set as handed back by the wire transport.
pub struct WireResultSet {
    pub columns: Vec<(String, QueryColumnType)>,
    pub rows: Vec<WireRow>,
    /// Set when the transport had more rows available but the caller's
    /// `maxRows` hard stop was hit first.
    pub truncated: bool,
}

/// Server-reported failure detail, mapped into `@@ERROR_*` for the
/// caller's TRY/CATCH frame.
pub struct SqlFailure {
    pub message: String,
    pub number: i32,
    pub severity: i32,
    pub state: i32,
    /// Set when the transport classifies this as an expired/rejected
    /// auth context rather than a query-level failure. Drives the
    /// reseed-and-retry path in [`execute_sql`].
    pub auth_failed: bool,
}

/// The wire connection collaborator. A concrete implementation dials the
/// TDS endpoint with `tiberius`; this crate only owns the accept-list
/// check, streaming/maxRows discipline, and type normalization above it.
#[async_trait]
pub trait TdsTransport: Send + Sync {
    async fn run(&self, sql: &str, cancel: &CancellationToken) -> Result<WireResultSet, SqlFailure>;
}

fn columns_from_wire(columns: &[(String, QueryColumnType)]) -> Vec<Column> {
    columns
        .iter()
        .map(|(name, ty)| {
            let mut c = Column::simple(name.clone());
            c.data_type = Some(format!("{ty:?}"));
            c
        })
        .collect()
}

/// `ExecuteSql(sql, maxRows?, ctx) -> QueryResult`. Rejects non-read-only
/// statements before dialling. Leases a client from `pool` per attempt: on
/// an `auth_failed` transport failure the seed is invalidated and the
/// statement is retried once against a freshly leased client; a second
/// auth failure (or any other failure) is recorded into `vars`' `@@ERROR_*`
/// state and propagated as `AuthFailed`/`QueryFailed` respectively.
pub async fn execute_sql<F>(
    pool: &Pool<F>,
    sql: &str,
    max_rows: Option<usize>,
    cancel: &CancellationToken,
    vars: &mut VariableScope,
) -> CoreResult<QueryResult>
where
    F: SeedFactory,
    F::Client: TdsTransport,
{
    check_read_only(sql)?;
    debug!(sql_len = sql.len(), max_rows = max_rows, "executing TDS statement");

    let mut reauthed = false;
    let wire = loop {
        let lease = pool.get_lease(cancel).await?;
        let result = lease.client().run(sql, cancel).await;
        drop(lease);

        match result {
            Ok(wire) => break wire,
            Err(failure) if failure.auth_failed && !reauthed => {
                reauthed = true;
                pool.invalidate_seed().await;
                debug!("TDS auth failure, reseeding and retrying once");
            }
            Err(failure) => {
                vars.set_error_state(&failure.message, failure.number, failure.severity, failure.state);
                let code = if failure.auth_failed { ErrorCode::AuthFailed } else { ErrorCode::QueryFailed };
                return Err(CoreError::new(code, failure.message)
                    .with_details(format!("number={} severity={} state={}", failure.number, failure.severity, failure.state)));
            }
        }
    };

    let columns = columns_from_wire(&wire.columns);
    let col_names: Vec<String> = wire.columns.iter().map(|(n, _)| n.clone()).collect();

    let mut rows = wire.rows;
    let mut truncated = wire.truncated;
    if let Some(limit) = max_rows {
        if rows.len() > limit {
            rows.truncate(limit);
            truncated = true;
        }
    }

    let records: Vec<Record> = rows
        .into_iter()
        .map(|row| {
            let mut record = Record::new();
            for (name, cell) in col_names.iter().zip(row.cells.iter()) {
                record.insert(name.clone(), normalize(cell));
            }
            record
        })
        .collect();

    let mut result = QueryResult::new("", columns, records);
    result.more_records = truncated;
    result.paging_cookie = None;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::pool::Pool;

    #[test]
    fn select_is_accepted() {
        assert!(check_read_only("SELECT 1").is_ok());
    }

    #[test]
    fn insert_is_rejected() {
        let err = check_read_only("INSERT INTO t VALUES (1)").unwrap_err();
        assert_eq!(err.code.as_str(), "InvalidArguments");
    }

    #[test]
    fn leading_line_comment_stripped() {
        assert!(check_read_only("-- a comment\nSELECT 1").is_ok());
    }

    #[test]
    fn leading_block_comment_stripped() {
        assert!(check_read_only("/* block */ WITH cte AS (SELECT 1) SELECT * FROM cte").is_ok());
    }

    #[test]
    fn empty_statement_rejected() {
        assert!(check_read_only("   ").is_err());
    }

    #[derive(Clone)]
    struct FakeClient {
        calls: Arc<AtomicUsize>,
        behavior: FakeBehavior,
    }

    #[derive(Clone)]
    enum FakeBehavior {
        NeverCalled,
        Rows,
        AlwaysAuthFailed,
        AuthFailedOnce,
        QueryFailed,
    }

    #[async_trait]
    impl TdsTransport for FakeClient {
        async fn run(&self, _sql: &str, _cancel: &CancellationToken) -> Result<WireResultSet, SqlFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                FakeBehavior::NeverCalled => panic!("should not dial for a rejected statement"),
                FakeBehavior::Rows => Ok(WireResultSet {
                    columns: vec![("name".to_string(), QueryColumnType::String)],
                    rows: (0..5)
                        .map(|i| WireRow { cells: vec![WireCell::String(format!("row{i}"))] })
                        .collect(),
                    truncated: false,
                }),
                FakeBehavior::AlwaysAuthFailed => Err(SqlFailure {
                    message: "login failed".to_string(),
                    number: 18456,
                    severity: 14,
                    state: 1,
                    auth_failed: true,
                }),
                FakeBehavior::AuthFailedOnce => {
                    if call == 0 {
                        Err(SqlFailure {
                            message: "login failed".to_string(),
                            number: 18456,
                            severity: 14,
                            state: 1,
                            auth_failed: true,
                        })
                    } else {
                        Ok(WireResultSet {
                            columns: vec![("name".to_string(), QueryColumnType::String)],
                            rows: vec![WireRow { cells: vec![WireCell::String("ok".to_string())] }],
                            truncated: false,
                        })
                    }
                }
                FakeBehavior::QueryFailed => Err(SqlFailure {
                    message: "x".to_string(),
                    number: 50001,
                    severity: 16,
                    state: 1,
                    auth_failed: false,
                }),
            }
        }
    }

    struct FakeFactory {
        client: FakeClient,
        invalidations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SeedFactory for FakeFactory {
        type Client = FakeClient;
        async fn create(&self) -> CoreResult<FakeClient> {
            Ok(self.client.clone())
        }
        async fn invalidate(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn execute_sql_rejects_before_dialling() {
        let client = FakeClient { calls: Arc::new(AtomicUsize::new(0)), behavior: FakeBehavior::NeverCalled };
        let pool = Pool::init(FakeFactory { client, invalidations: Arc::new(AtomicUsize::new(0)) }, Some(2), None).await;
        let mut vars = VariableScope::new();
        let cancel = CancellationToken::new();
        let err = execute_sql(&pool, "DROP TABLE t", None, &cancel, &mut vars).await.unwrap_err();
        assert_eq!(err.code.as_str(), "InvalidArguments");
    }

    #[tokio::test]
    async fn max_rows_truncates_and_sets_more_records() {
        let client = FakeClient { calls: Arc::new(AtomicUsize::new(0)), behavior: FakeBehavior::Rows };
        let pool = Pool::init(FakeFactory { client, invalidations: Arc::new(AtomicUsize::new(0)) }, Some(2), None).await;
        let mut vars = VariableScope::new();
        let cancel = CancellationToken::new();
        let result = execute_sql(&pool, "SELECT name FROM t", Some(3), &cancel, &mut vars)
            .await
            .unwrap();
        assert_eq!(result.count, 3);
        assert!(result.more_records);
    }

    #[tokio::test]
    async fn query_failure_sets_error_state() {
        let client = FakeClient { calls: Arc::new(AtomicUsize::new(0)), behavior: FakeBehavior::QueryFailed };
        let pool = Pool::init(FakeFactory { client, invalidations: Arc::new(AtomicUsize::new(0)) }, Some(2), None).await;
        let mut vars = VariableScope::new();
        let cancel = CancellationToken::new();
        let err = execute_sql(&pool, "SELECT 1", None, &cancel, &mut vars).await.unwrap_err();
        assert_eq!(err.code.as_str(), "QueryFailed");
        assert_eq!(vars.get("@@error_number"), Value::int(50001));
    }

    #[tokio::test]
    async fn auth_failure_reseeds_and_retries_once_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invalidations = Arc::new(AtomicUsize::new(0));
        let client = FakeClient { calls: calls.clone(), behavior: FakeBehavior::AuthFailedOnce };
        let pool = Pool::init(FakeFactory { client, invalidations: invalidations.clone() }, Some(2), None).await;
        let mut vars = VariableScope::new();
        let cancel = CancellationToken::new();
        let result = execute_sql(&pool, "SELECT 1", None, &cancel, &mut vars).await.unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persistent_auth_failure_propagates_after_one_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let invalidations = Arc::new(AtomicUsize::new(0));
        let client = FakeClient { calls: calls.clone(), behavior: FakeBehavior::AlwaysAuthFailed };
        let pool = Pool::init(FakeFactory { client, invalidations: invalidations.clone() }, Some(2), None).await;
        let mut vars = VariableScope::new();
        let cancel = CancellationToken::new();
        let err = execute_sql(&pool, "SELECT 1", None, &cancel, &mut vars).await.unwrap_err();
        assert_eq!(err.code.as_str(), "AuthFailed");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    }
}
