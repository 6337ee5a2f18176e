//! # Function Registry & Evaluator
//!
//! A name-indexed table of scalar functions with arity checking, NULL
//! propagation, and the ambient [`VariableScope`] the `ERROR_*` and
//! `@@ERROR_*`-reading functions consult.
//!
//! ## Argument evaluation
//!
//! Arguments are evaluated **eagerly** (strict evaluation) before `Invoke`
//! is called — `COALESCE`/`ISNULL` receive already-evaluated `Value`s and
//! simply scan for the first non-null, they do not themselves control
//! short-circuiting. This is a deliberate choice, recorded in `DESIGN.md`
//! (strict evaluation keeps the registry a pure `Vec<Value> -> Value`
//! table with no access to an
//! unevaluated AST, which is simpler to test and matches how the FetchXML
//! and TDS executors already hand the evaluator fully-materialized cell
//! values).

mod cast;
mod date_fns;
mod error_fns;
mod json_fns;
mod math_fns;
mod null_fns;
mod platform_fns;
mod string_fns;

pub use cast::{cast_value, convert_value};

use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::value::Value;
use crate::variables::VariableScope;
use std::collections::HashMap;

/// Inclusive-or-unbounded argument count range. `max = None` means variadic.
#[derive(Debug, Clone, Copy)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn fixed(n: usize) -> Self {
        Arity { min: n, max: Some(n) }
    }
    pub const fn range(min: usize, max: usize) -> Self {
        Arity { min, max: Some(max) }
    }
    pub const fn at_least(min: usize) -> Self {
        Arity { min, max: None }
    }
    fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map(|m| n <= m).unwrap_or(true)
    }
}

pub type Handler = fn(&[Value], &VariableScope) -> CoreResult<Value>;

#[derive(Clone, Copy)]
struct FunctionEntry {
    name: &'static str,
    arity: Arity,
    null_tolerant: bool,
    handler: Handler,
}

/// Name-indexed scalar function table. Name match is ASCII case-insensitive.
pub struct FunctionRegistry {
    entries: HashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    /// Builds the registry with the full built-in catalog (string, date,
    /// math, JSON, NULL, error, CAST/CONVERT, and platform-specific
    /// functions).
    pub fn with_builtins() -> Self {
        let mut reg = FunctionRegistry {
            entries: HashMap::new(),
        };
        string_fns::register(&mut reg);
        date_fns::register(&mut reg);
        math_fns::register(&mut reg);
        json_fns::register(&mut reg);
        null_fns::register(&mut reg);
        error_fns::register(&mut reg);
        platform_fns::register(&mut reg);
        reg
    }

    pub(crate) fn add(
        &mut self,
        name: &'static str,
        arity: Arity,
        null_tolerant: bool,
        handler: Handler,
    ) {
        self.entries.insert(
            name.to_ascii_lowercase(),
            FunctionEntry {
                name,
                arity,
                null_tolerant,
                handler,
            },
        );
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// `Invoke(name, args) -> Value`. Fails with `UnknownFunction` if
    /// unregistered, `ArgArity` if `len(args)` is outside `[min, max]`.
    /// Applies default NULL propagation unless the function is in the
    /// NULL-tolerant set.
    pub fn invoke(&self, name: &str, args: &[Value], vars: &VariableScope) -> CoreResult<Value> {
        let entry = self
            .entries
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| {
                CoreError::new(ErrorCode::UnknownFunction, format!("unknown function {name}"))
                    .with_target(name.to_string())
            })?;

        if !entry.arity.accepts(args.len()) {
            return Err(CoreError::new(
                ErrorCode::ArgArity,
                format!(
                    "{} expects {}..{} argument(s), got {}",
                    entry.name,
                    entry.arity.min,
                    entry
                        .arity
                        .max
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "inf".to_string()),
                    args.len()
                ),
            )
            .with_target(entry.name.to_string()));
        }

        if !entry.null_tolerant && args.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }

        (entry.handler)(args, vars)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Helper used by handlers to pull a string out of a `Value`, without the
/// NULL check (callers already know NULL was handled by the registry,
/// except NULL-tolerant functions which must check for themselves).
pub(crate) fn as_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Simple(crate::value::Simple::String(s)) => s.clone(),
        Value::Simple(crate::value::Simple::Int(i)) => i.to_string(),
        Value::Simple(crate::value::Simple::Float(f)) => f.to_string(),
        Value::Simple(crate::value::Simple::Decimal(d)) => d.to_string(),
        Value::Simple(crate::value::Simple::Bool(b)) => if *b { "1" } else { "0" }.to_string(),
        Value::Simple(crate::value::Simple::DateTime(dt)) => {
            dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
        }
        Value::Simple(crate::value::Simple::Guid(g)) => g.to_string().to_uppercase(),
        Value::Money { amount, .. } => amount.to_string(),
        Value::Formatted { raw, .. } => as_text(raw),
        Value::Lookup { id, .. } => id.to_string(),
        Value::OptionSet { code, .. } => code.to_string(),
        Value::OptionSetSet { codes, .. } => codes
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(","),
    }
}

pub(crate) fn as_f64(v: &Value) -> CoreResult<f64> {
    match v {
        Value::Simple(crate::value::Simple::Int(i)) => Ok(*i as f64),
        Value::Simple(crate::value::Simple::Float(f)) => Ok(*f),
        Value::Simple(crate::value::Simple::Decimal(d)) => {
            use rust_decimal::prelude::ToPrimitive;
            d.to_f64()
                .ok_or_else(|| CoreError::new(ErrorCode::InvalidValue, "decimal out of f64 range"))
        }
        Value::Simple(crate::value::Simple::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CoreError::new(ErrorCode::InvalidValue, format!("cannot parse '{s}' as number"))),
        Value::Money { amount, .. } => {
            use rust_decimal::prelude::ToPrimitive;
            amount
                .to_f64()
                .ok_or_else(|| CoreError::new(ErrorCode::InvalidValue, "decimal out of f64 range"))
        }
        other => Err(CoreError::new(
            ErrorCode::InvalidValue,
            format!("cannot convert {other:?} to number"),
        )),
    }
}

pub(crate) fn as_i64(v: &Value) -> CoreResult<i64> {
    as_f64(v).map(|f| f.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_function_fails() {
        let reg = FunctionRegistry::with_builtins();
        let vars = VariableScope::new();
        let err = reg.invoke("NOPE", &[], &vars).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownFunction);
    }

    #[test]
    fn arity_mismatch_fails() {
        let reg = FunctionRegistry::with_builtins();
        let vars = VariableScope::new();
        let err = reg.invoke("LEN", &[], &vars).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ArgArity);
    }

    #[test]
    fn name_match_is_case_insensitive() {
        let reg = FunctionRegistry::with_builtins();
        let vars = VariableScope::new();
        let upper = reg.invoke("LEN", &[Value::string("abc")], &vars).unwrap();
        let lower = reg.invoke("len", &[Value::string("abc")], &vars).unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn default_null_propagation() {
        let reg = FunctionRegistry::with_builtins();
        let vars = VariableScope::new();
        let result = reg.invoke("UPPER", &[Value::Null], &vars).unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn null_tolerant_function_receives_nulls() {
        let reg = FunctionRegistry::with_builtins();
        let vars = VariableScope::new();
        let result = reg
            .invoke("ISNULL", &[Value::Null, Value::int(5)], &vars)
            .unwrap();
        assert_eq!(result, Value::int(5));
    }
}
