//! # Variable Scope
//!
//! Declared variables for a compiled script, including the ambient
//! `@@ERROR_*` quartet. Lookup walks from the innermost frame outward.
//! `IsDeclared` returns true only after an explicit `Declare`; `@@ERROR_*`
//! are writable only through [`VariableScope::set_error_state`].

use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

const ERROR_VARS: [&str; 4] = [
    "@@error_message",
    "@@error_number",
    "@@error_severity",
    "@@error_state",
];

#[derive(Debug, Default)]
struct Frame {
    vars: HashMap<String, Value>,
}

/// Ordered sequence of frames. Reading an undeclared `@@ERROR_*` returns
/// `Null`, never a fault.
#[derive(Debug)]
pub struct VariableScope {
    frames: Vec<Frame>,
    /// Captured once at scope creation so `GETDATE`/`SYSUTCDATETIME` are
    /// deterministic across every `Invoke` within the same script, per the
    /// spec's date-function contract.
    now: DateTime<Utc>,
}

impl Default for VariableScope {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableScope {
    pub fn new() -> Self {
        VariableScope {
            frames: vec![Frame::default()],
            now: Utc::now(),
        }
    }

    /// Construct with an explicit "now", for deterministic tests.
    pub fn with_now(now: DateTime<Utc>) -> Self {
        VariableScope {
            frames: vec![Frame::default()],
            now,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    pub fn declare(&mut self, name: &str, initial: Value) {
        let key = Self::key(name);
        self.frames
            .last_mut()
            .expect("at least one frame always present")
            .vars
            .insert(key, initial);
    }

    pub fn is_declared(&self, name: &str) -> bool {
        let key = Self::key(name);
        self.frames.iter().rev().any(|f| f.vars.contains_key(&key))
    }

    pub fn get(&self, name: &str) -> Value {
        let key = Self::key(name);
        if ERROR_VARS.contains(&key.as_str()) && !self.is_declared(name) {
            return Value::Null;
        }
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.vars.get(&key))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn set(&mut self, name: &str, value: Value) -> CoreResult<()> {
        let key = Self::key(name);
        for frame in self.frames.iter_mut().rev() {
            if let Some(slot) = frame.vars.get_mut(&key) {
                *slot = value;
                return Ok(());
            }
        }
        Err(CoreError::new(
            crate::error::ErrorCode::UndeclaredVariable,
            format!("variable {name} is not declared"),
        )
        .with_target(name.to_string()))
    }

    /// Atomically declares and assigns all four `@@ERROR_*` variables in the
    /// current (innermost) frame — the only sanctioned way to write them,
    /// invoked by the TRY/CATCH machinery around C6's `QueryFailed`.
    pub fn set_error_state(&mut self, message: &str, number: i32, severity: i32, state: i32) {
        let frame = self.frames.last_mut().expect("at least one frame always present");
        frame
            .vars
            .insert("@@error_message".into(), Value::string(message));
        frame
            .vars
            .insert("@@error_number".into(), Value::int(number as i64));
        frame
            .vars
            .insert("@@error_severity".into(), Value::int(severity as i64));
        frame
            .vars
            .insert("@@error_state".into(), Value::int(state as i64));
    }
}
