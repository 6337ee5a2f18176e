//! # Structured Error Taxonomy
//!
//! Every fault surfaced by this crate is a [`CoreError`] carrying one of a
//! small, closed set of stable codes. Callers map
//! `CoreError::code()` onto their own "structured error writer" collaborator
//! (`{code, message, target?, details?}`) without needing to match on crate
//! internals.
//!
//! ## Propagation policy
//!
//! Input and State errors are not retried; they surface immediately. Remote
//! errors may be recovered once locally (`AuthFailed` ⇒ reseed;
//! `Throttled`/`Transient` ⇒ back-off and retry up to a per-operation cap).
//! Remote errors that exceed the cap escalate to `Fatal`. `Cancelled` is
//! never downgraded.

use thiserror::Error;

/// The stable error code namespace callers key their structured error
/// writers off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    InvalidValue,
    InvalidArguments,
    InvalidFetchXml,
    NotSupported,
    CyclicSchema,
    AuthFailed,
    Throttled,
    PoolClosed,
    QueryFailed,
    InvalidCast,
    UnknownFunction,
    ArgArity,
    UndeclaredVariable,
    Transient,
    Fatal,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NotFound",
            ErrorCode::InvalidValue => "InvalidValue",
            ErrorCode::InvalidArguments => "InvalidArguments",
            ErrorCode::InvalidFetchXml => "InvalidFetchXml",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::CyclicSchema => "CyclicSchema",
            ErrorCode::AuthFailed => "AuthFailed",
            ErrorCode::Throttled => "Throttled",
            ErrorCode::PoolClosed => "PoolClosed",
            ErrorCode::QueryFailed => "QueryFailed",
            ErrorCode::InvalidCast => "InvalidCast",
            ErrorCode::UnknownFunction => "UnknownFunction",
            ErrorCode::ArgArity => "ArgArity",
            ErrorCode::UndeclaredVariable => "UndeclaredVariable",
            ErrorCode::Transient => "Transient",
            ErrorCode::Fatal => "Fatal",
            ErrorCode::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A core failure: stable code, human message, optional offending target
/// (entity/field/argument), optional server-supplied detail. Never a stack
/// trace of the running language — callers surface these to end users.
#[derive(Error, Debug)]
#[error("{code}: {message}")]
pub struct CoreError {
    pub code: ErrorCode,
    pub message: String,
    pub target: Option<String>,
    pub details: Option<String>,
}

impl CoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        CoreError {
            code,
            message: message.into(),
            target: None,
            details: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.code, ErrorCode::Throttled | ErrorCode::Transient)
    }

    pub fn not_found(target: impl Into<String>) -> Self {
        let t = target.into();
        CoreError::new(ErrorCode::NotFound, format!("{t} not found")).with_target(t)
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        CoreError::new(ErrorCode::InvalidArguments, message)
    }

    pub fn cancelled() -> Self {
        CoreError::new(ErrorCode::Cancelled, "operation cancelled")
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        CoreError::new(ErrorCode::Fatal, message)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<quick_xml::Error> for CoreError {
    fn from(e: quick_xml::Error) -> Self {
        CoreError::new(ErrorCode::InvalidFetchXml, e.to_string())
    }
}

impl From<quick_xml::DeError> for CoreError {
    fn from(e: quick_xml::DeError) -> Self {
        CoreError::new(ErrorCode::InvalidFetchXml, e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::new(ErrorCode::InvalidValue, e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::new(ErrorCode::Fatal, e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().map(|s| s.as_u16()) == Some(429) {
            CoreError::new(ErrorCode::Throttled, e.to_string())
        } else if e.is_timeout() || e.is_connect() {
            CoreError::new(ErrorCode::Transient, e.to_string())
        } else {
            CoreError::new(ErrorCode::QueryFailed, e.to_string())
        }
    }
}

impl From<tiberius::error::Error> for CoreError {
    fn from(e: tiberius::error::Error) -> Self {
        use tiberius::error::Error as TError;
        match &e {
            TError::Server(msg) => CoreError::new(ErrorCode::QueryFailed, msg.message.clone())
                .with_details(format!(
                    "number={} class={} state={}",
                    msg.number(),
                    msg.class(),
                    msg.state()
                )),
            TError::Io(_) => CoreError::new(ErrorCode::Transient, e.to_string()),
            _ => CoreError::new(ErrorCode::QueryFailed, e.to_string()),
        }
    }
}
