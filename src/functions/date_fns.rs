//! Date function category: `GETDATE`/`SYSUTCDATETIME`, `DATEADD`, `DATEDIFF`,
//! `DATEPART`, `YEAR`/`MONTH`/`DAY`, `EOMONTH`, `DATEFROMPARTS`,
//! `DATETIMEFROMPARTS`.
//!
//! Part names (`year|month|day|hour|minute|second|millisecond|week|quarter`)
//! are matched case-insensitively.

use super::{as_i64, as_text, Arity, FunctionRegistry};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::value::{Simple, Value};
use crate::variables::VariableScope;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.add("GETDATE", Arity::fixed(0), false, getdate);
    reg.add("SYSUTCDATETIME", Arity::fixed(0), false, getdate);
    reg.add("DATEADD", Arity::fixed(3), false, dateadd);
    reg.add("DATEDIFF", Arity::fixed(3), false, datediff);
    reg.add("DATEPART", Arity::fixed(2), false, datepart);
    reg.add("YEAR", Arity::fixed(1), false, year);
    reg.add("MONTH", Arity::fixed(1), false, month);
    reg.add("DAY", Arity::fixed(1), false, day);
    reg.add("EOMONTH", Arity::range(1, 2), false, eomonth);
    reg.add("DATEFROMPARTS", Arity::fixed(3), false, datefromparts);
    reg.add("DATETIMEFROMPARTS", Arity::fixed(7), false, datetimefromparts);
}

fn getdate(_args: &[Value], vars: &VariableScope) -> CoreResult<Value> {
    Ok(Value::Simple(Simple::DateTime(vars.now())))
}

fn as_datetime(v: &Value) -> CoreResult<DateTime<Utc>> {
    match v {
        Value::Simple(Simple::DateTime(dt)) => Ok(*dt),
        Value::Simple(Simple::String(s)) => parse_datetime(s),
        other => Err(CoreError::new(
            ErrorCode::InvalidValue,
            format!("cannot interpret {other:?} as a datetime"),
        )),
    }
}

pub(crate) fn parse_datetime(s: &str) -> CoreResult<DateTime<Utc>> {
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d",
    ] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
        }
    }
    Err(CoreError::new(ErrorCode::InvalidCast, format!("cannot parse '{s}' as datetime")))
}

enum Part {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

fn parse_part(s: &str) -> CoreResult<Part> {
    match s.to_ascii_lowercase().as_str() {
        "year" | "yy" | "yyyy" => Ok(Part::Year),
        "quarter" | "qq" | "q" => Ok(Part::Quarter),
        "month" | "mm" | "m" => Ok(Part::Month),
        "week" | "wk" | "ww" => Ok(Part::Week),
        "day" | "dd" | "d" => Ok(Part::Day),
        "hour" | "hh" => Ok(Part::Hour),
        "minute" | "mi" | "n" => Ok(Part::Minute),
        "second" | "ss" | "s" => Ok(Part::Second),
        "millisecond" | "ms" => Ok(Part::Millisecond),
        other => Err(CoreError::new(ErrorCode::InvalidArguments, format!("unknown date part '{other}'"))),
    }
}

fn dateadd(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let part = parse_part(&as_text(&args[0]))?;
    let n = as_i64(&args[1])?;
    let dt = as_datetime(&args[2])?;
    let result = match part {
        Part::Year => dt
            .with_year(dt.year() + n as i32)
            .ok_or_else(|| CoreError::new(ErrorCode::InvalidValue, "date out of range"))?,
        Part::Quarter => add_months(dt, n * 3)?,
        Part::Month => add_months(dt, n)?,
        Part::Week => dt + Duration::weeks(n),
        Part::Day => dt + Duration::days(n),
        Part::Hour => dt + Duration::hours(n),
        Part::Minute => dt + Duration::minutes(n),
        Part::Second => dt + Duration::seconds(n),
        Part::Millisecond => dt + Duration::milliseconds(n),
    };
    Ok(Value::Simple(Simple::DateTime(result)))
}

fn add_months(dt: DateTime<Utc>, months: i64) -> CoreResult<DateTime<Utc>> {
    let total = dt.year() as i64 * 12 + (dt.month() as i64 - 1) + months;
    let year = total.div_euclid(12) as i32;
    let month = (total.rem_euclid(12) + 1) as u32;
    let last_day = days_in_month(year, month);
    let day = dt.day().min(last_day);
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| CoreError::new(ErrorCode::InvalidValue, "date out of range"))?
        .and_hms_nano_opt(dt.hour(), dt.minute(), dt.second(), dt.nanosecond())
        .unwrap();
    Ok(Utc.from_utc_datetime(&naive))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

fn datediff(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let part = parse_part(&as_text(&args[0]))?;
    let d1 = as_datetime(&args[1])?;
    let d2 = as_datetime(&args[2])?;
    let delta = d2 - d1;
    let n = match part {
        Part::Year => d2.year() as i64 - d1.year() as i64,
        Part::Quarter => {
            let months = (d2.year() as i64 * 12 + d2.month() as i64)
                - (d1.year() as i64 * 12 + d1.month() as i64);
            months.div_euclid(3)
        }
        Part::Month => (d2.year() as i64 * 12 + d2.month() as i64) - (d1.year() as i64 * 12 + d1.month() as i64),
        Part::Week => delta.num_weeks(),
        Part::Day => delta.num_days(),
        Part::Hour => delta.num_hours(),
        Part::Minute => delta.num_minutes(),
        Part::Second => delta.num_seconds(),
        Part::Millisecond => delta.num_milliseconds(),
    };
    Ok(Value::int(n))
}

fn datepart(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let part = parse_part(&as_text(&args[0]))?;
    let dt = as_datetime(&args[1])?;
    let n = match part {
        Part::Year => dt.year() as i64,
        Part::Quarter => (dt.month() as i64 - 1) / 3 + 1,
        Part::Month => dt.month() as i64,
        Part::Week => dt.iso_week().week() as i64,
        Part::Day => dt.day() as i64,
        Part::Hour => dt.hour() as i64,
        Part::Minute => dt.minute() as i64,
        Part::Second => dt.second() as i64,
        Part::Millisecond => (dt.nanosecond() / 1_000_000) as i64,
    };
    Ok(Value::int(n))
}

fn year(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::int(as_datetime(&args[0])?.year() as i64))
}

fn month(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::int(as_datetime(&args[0])?.month() as i64))
}

fn day(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::int(as_datetime(&args[0])?.day() as i64))
}

/// `EOMONTH(date[, months_to_add])`: last day of the month, time zeroed.
fn eomonth(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let dt = as_datetime(&args[0])?;
    let offset = if args.len() > 1 { as_i64(&args[1])? } else { 0 };
    let shifted = add_months(dt, offset)?;
    let last_day = days_in_month(shifted.year(), shifted.month());
    let naive = NaiveDate::from_ymd_opt(shifted.year(), shifted.month(), last_day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    Ok(Value::Simple(Simple::DateTime(Utc.from_utc_datetime(&naive))))
}

fn datefromparts(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let y = as_i64(&args[0])? as i32;
    let m = as_i64(&args[1])? as u32;
    let d = as_i64(&args[2])? as u32;
    let naive = NaiveDate::from_ymd_opt(y, m, d)
        .ok_or_else(|| CoreError::new(ErrorCode::InvalidArguments, "invalid date parts"))?
        .and_hms_opt(0, 0, 0)
        .unwrap();
    Ok(Value::Simple(Simple::DateTime(Utc.from_utc_datetime(&naive))))
}

fn datetimefromparts(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let y = as_i64(&args[0])? as i32;
    let m = as_i64(&args[1])? as u32;
    let d = as_i64(&args[2])? as u32;
    let hh = as_i64(&args[3])? as u32;
    let mi = as_i64(&args[4])? as u32;
    let ss = as_i64(&args[5])? as u32;
    let ms = as_i64(&args[6])? as u32;
    let naive = NaiveDate::from_ymd_opt(y, m, d)
        .ok_or_else(|| CoreError::new(ErrorCode::InvalidArguments, "invalid date parts"))?
        .and_hms_milli_opt(hh, mi, ss, ms)
        .ok_or_else(|| CoreError::new(ErrorCode::InvalidArguments, "invalid time parts"))?;
    Ok(Value::Simple(Simple::DateTime(Utc.from_utc_datetime(&naive))))
}
