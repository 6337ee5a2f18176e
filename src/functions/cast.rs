//! CAST/CONVERT and T-SQL CONVERT style codes.
//!
//! Target types: `int`, `bigint`, `decimal(p,s)|numeric(p,s)`, `float`,
//! `real`, `nvarchar(n|max)`, `varchar`, `nchar`, `char`, `datetime`,
//! `date`, `bit`, `uniqueidentifier`, `money`, `smallmoney`.

use super::date_fns::parse_datetime;
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::value::{Simple, Value};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaxLength {
    Fixed(usize),
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseType {
    Int,
    BigInt,
    Decimal,
    Float,
    Real,
    NVarChar,
    VarChar,
    NChar,
    Char,
    DateTime,
    Date,
    Bit,
    UniqueIdentifier,
    Money,
    SmallMoney,
}

/// `(base, maxLength?, precision?, scale?)` as parsed from a target type
/// string. `max` parses to an unbounded `MaxLength::Max`.
#[derive(Debug, Clone)]
struct TargetType {
    base: BaseType,
    max_length: Option<MaxLength>,
    precision: Option<u32>,
    scale: Option<u32>,
}

fn parse_target(spec: &str) -> CoreResult<TargetType> {
    let spec = spec.trim();
    let (name, args) = match spec.find('(') {
        Some(idx) => {
            let name = &spec[..idx];
            let close = spec.rfind(')').ok_or_else(|| {
                CoreError::new(ErrorCode::InvalidArguments, format!("malformed type spec '{spec}'"))
            })?;
            (name, Some(&spec[idx + 1..close]))
        }
        None => (spec, None),
    };

    let base = match name.trim().to_ascii_lowercase().as_str() {
        "int" => BaseType::Int,
        "bigint" => BaseType::BigInt,
        "decimal" | "numeric" => BaseType::Decimal,
        "float" => BaseType::Float,
        "real" => BaseType::Real,
        "nvarchar" => BaseType::NVarChar,
        "varchar" => BaseType::VarChar,
        "nchar" => BaseType::NChar,
        "char" => BaseType::Char,
        "datetime" => BaseType::DateTime,
        "date" => BaseType::Date,
        "bit" => BaseType::Bit,
        "uniqueidentifier" => BaseType::UniqueIdentifier,
        "money" => BaseType::Money,
        "smallmoney" => BaseType::SmallMoney,
        other => {
            return Err(CoreError::new(ErrorCode::NotSupported, format!("unsupported cast target '{other}'")))
        }
    };

    let mut max_length = None;
    let mut precision = None;
    let mut scale = None;

    if let Some(args) = args {
        match base {
            BaseType::NVarChar | BaseType::VarChar | BaseType::NChar | BaseType::Char => {
                if args.trim().eq_ignore_ascii_case("max") {
                    max_length = Some(MaxLength::Max);
                } else {
                    let n: usize = args.trim().parse().map_err(|_| {
                        CoreError::new(ErrorCode::InvalidArguments, format!("bad length '{args}'"))
                    })?;
                    max_length = Some(MaxLength::Fixed(n));
                }
            }
            BaseType::Decimal => {
                let parts: Vec<&str> = args.split(',').map(str::trim).collect();
                precision = Some(parts[0].parse().map_err(|_| {
                    CoreError::new(ErrorCode::InvalidArguments, format!("bad precision '{}'", parts[0]))
                })?);
                if parts.len() > 1 {
                    scale = Some(parts[1].parse().map_err(|_| {
                        CoreError::new(ErrorCode::InvalidArguments, format!("bad scale '{}'", parts[1]))
                    })?);
                }
            }
            _ => {}
        }
    }

    Ok(TargetType {
        base,
        max_length,
        precision,
        scale,
    })
}

fn truncate_to_max_length(s: String, max_length: Option<MaxLength>) -> String {
    match max_length {
        Some(MaxLength::Fixed(n)) => s.chars().take(n).collect(),
        _ => s,
    }
}

/// Default ISO form used when no style is supplied (and the fallback for
/// unknown style codes): `yyyy-MM-ddTHH:mm:ss.fff`.
const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

fn style_format(style: i32) -> &'static str {
    match style {
        1 => "%m/%d/%y",
        2 => "%y.%m.%d",
        3 => "%d/%m/%y",
        4 => "%d.%m.%y",
        5 => "%d-%m-%y",
        100 => "%b %d %Y %I:%M%p",
        101 => "%m/%d/%Y",
        102 => "%Y.%m.%d",
        103 => "%d/%m/%Y",
        104 => "%d.%m.%Y",
        105 => "%d-%m-%Y",
        106 => "%d %b %Y",
        107 => "%b %d, %Y",
        108 => "%H:%M:%S",
        120 => "%Y-%m-%d %H:%M:%S",
        121 => "%Y-%m-%d %H:%M:%S%.3f",
        127 => "%Y-%m-%dT%H:%M:%S%.3fZ",
        126 => DEFAULT_DATETIME_FORMAT,
        _ => DEFAULT_DATETIME_FORMAT,
    }
}

fn format_datetime(dt: DateTime<Utc>, style: Option<i32>) -> String {
    let fmt = style.map(style_format).unwrap_or(DEFAULT_DATETIME_FORMAT);
    dt.format(fmt).to_string()
}

fn value_to_decimal(v: &Value) -> CoreResult<Decimal> {
    match v {
        Value::Simple(Simple::Decimal(d)) => Ok(*d),
        Value::Simple(Simple::Int(i)) => Ok(Decimal::from(*i)),
        Value::Simple(Simple::Float(f)) => {
            Decimal::from_f64(*f).ok_or_else(|| CoreError::new(ErrorCode::InvalidCast, "float not representable as decimal"))
        }
        Value::Simple(Simple::String(s)) => s
            .trim()
            .parse::<Decimal>()
            .map_err(|_| CoreError::new(ErrorCode::InvalidCast, format!("cannot parse '{s}' as decimal"))),
        Value::Money { amount, .. } => Ok(*amount),
        Value::Simple(Simple::DateTime(_)) => {
            Err(CoreError::new(ErrorCode::InvalidCast, "datetime -> numeric is not supported"))
        }
        other => Err(CoreError::new(ErrorCode::InvalidCast, format!("cannot cast {other:?} to a number"))),
    }
}

fn value_to_f64(v: &Value) -> CoreResult<f64> {
    value_to_decimal(v)?
        .to_f64()
        .ok_or_else(|| CoreError::new(ErrorCode::InvalidCast, "decimal out of f64 range"))
}

fn value_to_bool(v: &Value) -> CoreResult<bool> {
    match v {
        Value::Simple(Simple::Bool(b)) => Ok(*b),
        Value::Simple(Simple::String(s)) => {
            if s.eq_ignore_ascii_case("1") || s.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if s.eq_ignore_ascii_case("0") || s.eq_ignore_ascii_case("false") {
                Ok(false)
            } else {
                Err(CoreError::new(ErrorCode::InvalidCast, format!("cannot cast '{s}' to bit")))
            }
        }
        Value::Simple(Simple::Int(i)) => Ok(*i != 0),
        Value::Simple(Simple::Float(f)) => Ok(*f != 0.0),
        Value::Simple(Simple::Decimal(d)) => Ok(!d.is_zero()),
        other => Err(CoreError::new(ErrorCode::InvalidCast, format!("cannot cast {other:?} to bit"))),
    }
}

fn value_to_datetime(v: &Value) -> CoreResult<DateTime<Utc>> {
    match v {
        Value::Simple(Simple::DateTime(dt)) => Ok(*dt),
        Value::Simple(Simple::String(s)) => parse_datetime(s),
        Value::Simple(Simple::Int(_)) | Value::Simple(Simple::Float(_)) | Value::Simple(Simple::Decimal(_)) => {
            Err(CoreError::new(ErrorCode::InvalidCast, "numeric -> datetime is not supported"))
        }
        other => Err(CoreError::new(ErrorCode::InvalidCast, format!("cannot cast {other:?} to datetime"))),
    }
}

fn value_to_guid(v: &Value) -> CoreResult<Uuid> {
    match v {
        Value::Simple(Simple::Guid(g)) => Ok(*g),
        Value::Simple(Simple::String(s)) => {
            Uuid::parse_str(s.trim()).map_err(|_| CoreError::new(ErrorCode::InvalidCast, format!("cannot parse '{s}' as uniqueidentifier")))
        }
        Value::Lookup { id, .. } => Ok(*id),
        other => Err(CoreError::new(ErrorCode::InvalidCast, format!("cannot cast {other:?} to uniqueidentifier"))),
    }
}

fn round_scale(d: Decimal, scale: u32) -> Decimal {
    d.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

fn text_representation(v: &Value, style: Option<i32>) -> CoreResult<String> {
    Ok(match v {
        Value::Simple(Simple::DateTime(dt)) => format_datetime(*dt, style),
        Value::Simple(Simple::Guid(g)) => g.to_string().to_uppercase(),
        Value::Simple(Simple::Bool(b)) => if *b { "1" } else { "0" }.to_string(),
        Value::Simple(Simple::String(s)) => s.clone(),
        Value::Simple(Simple::Int(i)) => i.to_string(),
        Value::Simple(Simple::Float(f)) => f.to_string(),
        Value::Simple(Simple::Decimal(d)) => d.to_string(),
        Value::Money { amount, .. } => amount.to_string(),
        Value::Lookup { id, .. } => id.to_string().to_uppercase(),
        Value::OptionSet { code, .. } => code.to_string(),
        Value::OptionSetSet { codes, .. } => codes.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(","),
        Value::Formatted { raw, .. } => text_representation(raw, style)?,
        Value::Null => String::new(),
    })
}

fn convert_inner(v: &Value, target: &TargetType, style: Option<i32>) -> CoreResult<Value> {
    match target.base {
        BaseType::NVarChar | BaseType::VarChar | BaseType::NChar | BaseType::Char => {
            let text = text_representation(v, style)?;
            Ok(Value::string(truncate_to_max_length(text, target.max_length)))
        }
        BaseType::Int | BaseType::BigInt => {
            if let Value::Simple(Simple::Bool(b)) = v {
                return Ok(Value::int(if *b { 1 } else { 0 }));
            }
            let d = value_to_decimal(v)?;
            let truncated = d.trunc();
            truncated
                .to_i64()
                .map(Value::int)
                .ok_or_else(|| CoreError::new(ErrorCode::InvalidCast, "value out of integer range"))
        }
        BaseType::Decimal => {
            let d = value_to_decimal(v)?;
            let scale = target.scale.unwrap_or(0);
            Ok(Value::Simple(Simple::Decimal(round_scale(d, scale))))
        }
        BaseType::Money | BaseType::SmallMoney => {
            let d = value_to_decimal(v)?;
            Ok(Value::Money {
                amount: round_scale(d, 4),
                formatted: None,
            })
        }
        BaseType::Float | BaseType::Real => Ok(Value::Simple(Simple::Float(value_to_f64(v)?))),
        BaseType::Bit => Ok(Value::Simple(Simple::Bool(value_to_bool(v)?))),
        BaseType::DateTime => Ok(Value::Simple(Simple::DateTime(value_to_datetime(v)?))),
        BaseType::Date => {
            let dt = value_to_datetime(v)?;
            let naive = NaiveDate::from_ymd_opt(dt.year(), dt.month(), dt.day())
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            Ok(Value::Simple(Simple::DateTime(Utc.from_utc_datetime(&naive))))
        }
        BaseType::UniqueIdentifier => Ok(Value::Simple(Simple::Guid(value_to_guid(v)?))),
    }
}

/// `CAST(value AS target)` — no style.
pub fn cast_value(value: &Value, target: &str) -> CoreResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let target = parse_target(target)?;
    convert_inner(value, &target, None)
}

/// `CONVERT(target, value[, style])`.
pub fn convert_value(value: &Value, target: &str, style: Option<i32>) -> CoreResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let target = parse_target(target)?;
    convert_inner(value, &target, style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn convert_datetime_style_101_and_126() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        let v = Value::Simple(Simple::DateTime(dt));
        assert_eq!(convert_value(&v, "nvarchar(30)", Some(101)).unwrap(), Value::string("03/05/2024"));
        assert_eq!(
            convert_value(&v, "nvarchar(30)", Some(126)).unwrap(),
            Value::string("2024-03-05T14:30:00.000")
        );
    }

    #[test]
    fn unknown_style_falls_back_to_default_iso() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        let v = Value::Simple(Simple::DateTime(dt));
        assert_eq!(
            convert_value(&v, "nvarchar(30)", Some(999)).unwrap(),
            Value::string("2024-03-05T14:30:00.000")
        );
    }

    #[test]
    fn bool_from_string_accepts_1_true_case_insensitive() {
        assert_eq!(cast_value(&Value::string("TRUE"), "bit").unwrap(), Value::Simple(Simple::Bool(true)));
        assert_eq!(cast_value(&Value::string("0"), "bit").unwrap(), Value::Simple(Simple::Bool(false)));
    }

    #[test]
    fn bool_from_other_string_faults() {
        let err = cast_value(&Value::string("maybe"), "bit").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCast);
    }

    #[test]
    fn datetime_numeric_cross_cast_faults() {
        let dt = Value::Simple(Simple::DateTime(Utc::now()));
        assert!(cast_value(&dt, "int").is_err());
        assert!(cast_value(&Value::int(5), "datetime").is_err());
    }

    #[test]
    fn money_rounds_to_four_digits() {
        let v = Value::string("1.23456");
        let result = cast_value(&v, "money").unwrap();
        match result {
            Value::Money { amount, .. } => assert_eq!(amount, Decimal::new(12346, 4)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn string_truncates_after_formatting() {
        let v = Value::string("hello world");
        assert_eq!(cast_value(&v, "nvarchar(5)").unwrap(), Value::string("hello"));
    }

    #[test]
    fn guid_output_is_uppercase() {
        let id = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let v = Value::Simple(Simple::Guid(id));
        assert_eq!(
            cast_value(&v, "nvarchar(max)").unwrap(),
            Value::string("00000000-0000-0000-0000-000000000001".to_uppercase())
        );
    }

    #[test]
    fn cast_roundtrip_int() {
        let v = Value::int(42);
        let s = cast_value(&v, "nvarchar(max)").unwrap();
        let back = cast_value(&s, "int").unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn cast_roundtrip_decimal() {
        let v = Value::Simple(Simple::Decimal(Decimal::new(123400, 4)));
        let s = cast_value(&v, "nvarchar(max)").unwrap();
        let back = cast_value(&s, "decimal(18,4)").unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn cast_null_is_null() {
        assert_eq!(cast_value(&Value::Null, "int").unwrap(), Value::Null);
    }
}
