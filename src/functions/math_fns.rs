//! Math function category: `ABS`, `CEILING`, `FLOOR`, `ROUND`, `POWER`,
//! `SQRT`, `EXP`, `LOG`, `LOG10`, `PI`, `RAND`, `SIGN`, `SIN`, `COS`, `TAN`,
//! `ATN2`.

use super::{as_f64, as_i64, Arity, FunctionRegistry};
use crate::error::CoreResult;
use crate::value::Value;
use crate::variables::VariableScope;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.add("ABS", Arity::fixed(1), false, abs);
    reg.add("CEILING", Arity::fixed(1), false, ceiling);
    reg.add("FLOOR", Arity::fixed(1), false, floor);
    reg.add("ROUND", Arity::range(2, 3), false, round);
    reg.add("POWER", Arity::fixed(2), false, power);
    reg.add("SQRT", Arity::fixed(1), false, sqrt);
    reg.add("EXP", Arity::fixed(1), false, exp);
    reg.add("LOG", Arity::fixed(1), false, log);
    reg.add("LOG10", Arity::fixed(1), false, log10);
    reg.add("PI", Arity::fixed(0), false, pi);
    reg.add("RAND", Arity::range(0, 1), false, rand_fn);
    reg.add("SIGN", Arity::fixed(1), false, sign);
    reg.add("SIN", Arity::fixed(1), false, sin);
    reg.add("COS", Arity::fixed(1), false, cos);
    reg.add("TAN", Arity::fixed(1), false, tan);
    reg.add("ATN2", Arity::fixed(2), false, atn2);
}

fn num(v: f64) -> Value {
    Value::Simple(crate::value::Simple::Float(v))
}

fn abs(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.abs()))
}

fn ceiling(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.ceil()))
}

fn floor(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.floor()))
}

/// `ROUND(x, n[, mode])`. `mode` 0 (or omitted) uses banker's rounding
/// (round-half-to-even); a non-zero mode truncates toward zero instead of
/// rounding the dropped digit. This is a documented, deliberate choice: the
/// spec flags this exact ambiguity as an Open Question (source behaviour
/// vs. T-SQL's own semantics) and directs implementers to "fix one
/// behaviour and test both" rather than guess — see `DESIGN.md`.
fn round(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let x = as_f64(&args[0])?;
    let n = as_i64(&args[1])?;
    let mode = if args.len() > 2 { as_i64(&args[2])? } else { 0 };
    let d = Decimal::from_f64(x).unwrap_or_default();
    let scale = n.max(0) as u32;
    let rounded = if mode == 0 {
        d.round_dp_with_strategy(scale, rust_decimal::RoundingStrategy::MidpointNearestEven)
    } else {
        d.round_dp_with_strategy(scale, rust_decimal::RoundingStrategy::ToZero)
    };
    Ok(num(rounded.to_string().parse::<f64>().unwrap_or(x)))
}

fn power(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.powf(as_f64(&args[1])?)))
}

fn sqrt(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.sqrt()))
}

fn exp(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.exp()))
}

fn log(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.ln()))
}

fn log10(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.log10()))
}

fn pi(_args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(std::f64::consts::PI))
}

/// Deterministic within a script for the same reason `GETDATE` is: backed
/// by a simple xorshift seeded from the evaluator's captured `now`, so
/// repeated calls within one script produce a reproducible (if evolving)
/// sequence rather than true non-determinism leaking into test fixtures.
fn rand_fn(args: &[Value], vars: &VariableScope) -> CoreResult<Value> {
    let seed = if !args.is_empty() {
        as_i64(&args[0])? as u64
    } else {
        vars.now().timestamp_millis() as u64
    };
    let mut x = seed ^ 0x9E3779B97F4A7C15;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    Ok(num((x % 1_000_000) as f64 / 1_000_000.0))
}

fn sign(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let x = as_f64(&args[0])?;
    Ok(Value::int(if x > 0.0 { 1 } else if x < 0.0 { -1 } else { 0 }))
}

fn sin(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.sin()))
}

fn cos(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.cos()))
}

fn tan(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.tan()))
}

fn atn2(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(num(as_f64(&args[0])?.atan2(as_f64(&args[1])?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;

    fn invoke(name: &str, args: &[Value]) -> Value {
        let reg = FunctionRegistry::with_builtins();
        let vars = VariableScope::new();
        reg.invoke(name, args, &vars).unwrap()
    }

    #[test]
    fn round_default_is_banker() {
        // ROUND(2.5, 0) with default mode yields 2 (round-half-to-even).
        assert_eq!(invoke("ROUND", &[Value::Simple(crate::value::Simple::Float(2.5)), Value::int(0)]), num(2.0));
    }

    #[test]
    fn round_nonzero_mode_truncates() {
        // ROUND(2.5, 0, 1) truncates toward zero instead of rounding.
        assert_eq!(
            invoke(
                "ROUND",
                &[Value::Simple(crate::value::Simple::Float(2.5)), Value::int(0), Value::int(1)]
            ),
            num(2.0)
        );
        assert_eq!(
            invoke(
                "ROUND",
                &[Value::Simple(crate::value::Simple::Float(2.9)), Value::int(0), Value::int(1)]
            ),
            num(2.0)
        );
    }

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(invoke("SIGN", &[Value::int(0)]), Value::int(0));
    }

    #[test]
    fn pi_matches_std_const() {
        assert_eq!(invoke("PI", &[]), num(std::f64::consts::PI));
    }
}
