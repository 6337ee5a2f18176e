//! String function category: `LEN`, `UPPER`, `LOWER`, `LTRIM`, `RTRIM`,
//! `TRIM`, `LEFT`, `RIGHT`, `SUBSTRING`, `REPLACE`, `CHARINDEX`, `PATINDEX`,
//! `CONCAT`, `CONCAT_WS`, `STRING_SPLIT`, `REVERSE`, `REPLICATE`, `SPACE`,
//! `FORMAT`, `STR`.

use super::{as_i64, as_text, Arity, FunctionRegistry};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::value::Value;
use crate::variables::VariableScope;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.add("LEN", Arity::fixed(1), false, len);
    reg.add("UPPER", Arity::fixed(1), false, upper);
    reg.add("LOWER", Arity::fixed(1), false, lower);
    reg.add("LTRIM", Arity::fixed(1), false, ltrim);
    reg.add("RTRIM", Arity::fixed(1), false, rtrim);
    reg.add("TRIM", Arity::fixed(1), false, trim);
    reg.add("LEFT", Arity::fixed(2), false, left);
    reg.add("RIGHT", Arity::fixed(2), false, right);
    reg.add("SUBSTRING", Arity::fixed(3), false, substring);
    reg.add("REPLACE", Arity::fixed(3), false, replace);
    reg.add("CHARINDEX", Arity::range(2, 3), false, charindex);
    reg.add("PATINDEX", Arity::fixed(2), false, patindex);
    reg.add("CONCAT", Arity::at_least(1), true, concat);
    reg.add("CONCAT_WS", Arity::at_least(2), true, concat_ws);
    reg.add("STRING_SPLIT", Arity::fixed(2), false, string_split);
    reg.add("REVERSE", Arity::fixed(1), false, reverse);
    reg.add("REPLICATE", Arity::fixed(2), false, replicate);
    reg.add("SPACE", Arity::fixed(1), false, space);
    reg.add("FORMAT", Arity::range(2, 3), false, format_fn);
    reg.add("STR", Arity::range(1, 3), false, str_fn);
}

fn len(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::int(as_text(&args[0]).chars().count() as i64))
}

fn upper(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::string(as_text(&args[0]).to_uppercase()))
}

fn lower(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::string(as_text(&args[0]).to_lowercase()))
}

fn ltrim(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::string(as_text(&args[0]).trim_start().to_string()))
}

fn rtrim(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::string(as_text(&args[0]).trim_end().to_string()))
}

fn trim(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::string(as_text(&args[0]).trim().to_string()))
}

fn left(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let s = as_text(&args[0]);
    let n = as_i64(&args[1])?.max(0) as usize;
    Ok(Value::string(s.chars().take(n).collect::<String>()))
}

fn right(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let s = as_text(&args[0]);
    let n = as_i64(&args[1])?.max(0) as usize;
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(n);
    Ok(Value::string(chars[start..].iter().collect::<String>()))
}

/// `SUBSTRING(s, start, len)` — 1-based, clipped: a `start` below 1 is
/// clipped to 1; a request past the end of the string yields `""`.
fn substring(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let s = as_text(&args[0]);
    let chars: Vec<char> = s.chars().collect();
    let start = as_i64(&args[1])?.max(1) as usize;
    let length = as_i64(&args[2])?.max(0) as usize;
    let start_idx = start - 1;
    if start_idx >= chars.len() {
        return Ok(Value::string(""));
    }
    let end_idx = (start_idx + length).min(chars.len());
    Ok(Value::string(chars[start_idx..end_idx].iter().collect::<String>()))
}

fn replace(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let s = as_text(&args[0]);
    let needle = as_text(&args[1]);
    let replacement = as_text(&args[2]);
    if needle.is_empty() {
        return Ok(Value::string(s));
    }
    Ok(Value::string(s.replace(&needle, &replacement)))
}

fn charindex(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let needle = as_text(&args[0]);
    let hay = as_text(&args[1]);
    let start = if args.len() == 3 {
        as_i64(&args[2])?.max(1) as usize - 1
    } else {
        0
    };
    if needle.is_empty() || start > hay.chars().count() {
        return Ok(Value::int(0));
    }
    let chars: Vec<char> = hay.chars().collect();
    let haystack_from: String = chars[start.min(chars.len())..].iter().collect();
    match haystack_from.find(&needle) {
        Some(byte_idx) => {
            let char_idx = haystack_from[..byte_idx].chars().count();
            Ok(Value::int((start + char_idx + 1) as i64))
        }
        None => Ok(Value::int(0)),
    }
}

/// Minimal T-SQL pattern support: `%` (any run) and `_` (single char).
fn patindex(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let pattern = as_text(&args[0]);
    let hay = as_text(&args[1]);
    let pat = pattern.trim_matches('%');
    let leading_wild = pattern.starts_with('%');
    let trailing_wild = pattern.ends_with('%');

    let regex_like = glob_to_segments(pat);
    let chars: Vec<char> = hay.chars().collect();

    for start in 0..=chars.len() {
        if !leading_wild && start != 0 {
            break;
        }
        if let Some(matched_len) = try_match(&regex_like, &chars[start..]) {
            if trailing_wild || start + matched_len == chars.len() {
                return Ok(Value::int((start + 1) as i64));
            }
        }
    }
    Ok(Value::int(0))
}

enum Seg {
    Literal(char),
    AnyOne,
}

fn glob_to_segments(pat: &str) -> Vec<Seg> {
    pat.chars()
        .map(|c| if c == '_' { Seg::AnyOne } else { Seg::Literal(c) })
        .collect()
}

fn try_match(segs: &[Seg], chars: &[char]) -> Option<usize> {
    if segs.len() > chars.len() {
        return None;
    }
    for (i, seg) in segs.iter().enumerate() {
        match seg {
            Seg::AnyOne => continue,
            Seg::Literal(c) if chars[i] == *c => continue,
            _ => return None,
        }
    }
    Some(segs.len())
}

/// Variadic, NULL-tolerant: a `Null` argument contributes the empty string.
fn concat(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let mut out = String::new();
    for a in args {
        if !a.is_null() {
            out.push_str(&as_text(a));
        }
    }
    Ok(Value::string(out))
}

fn concat_ws(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let sep = as_text(&args[0]);
    let parts: Vec<String> = args[1..]
        .iter()
        .filter(|a| !a.is_null())
        .map(as_text)
        .collect();
    Ok(Value::string(parts.join(&sep)))
}

fn string_split(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let s = as_text(&args[0]);
    let sep = as_text(&args[1]);
    let sep_char = sep.chars().next().ok_or_else(|| {
        CoreError::new(ErrorCode::InvalidArguments, "STRING_SPLIT separator must be one character")
    })?;
    Ok(Value::string(
        s.split(sep_char).collect::<Vec<_>>().join("\u{1}"),
    ))
}

fn reverse(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::string(as_text(&args[0]).chars().rev().collect::<String>()))
}

fn replicate(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let s = as_text(&args[0]);
    let n = as_i64(&args[1])?.max(0) as usize;
    Ok(Value::string(s.repeat(n)))
}

fn space(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let n = as_i64(&args[0])?.max(0) as usize;
    Ok(Value::string(" ".repeat(n)))
}

/// A pragmatic subset of T-SQL `FORMAT`: numeric styles `N0`/`N2` and the
/// common date tokens, enough for the evaluator's documented surface.
fn format_fn(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let style = as_text(&args[1]);
    match &args[0] {
        Value::Simple(crate::value::Simple::DateTime(dt)) => {
            let token = style
                .replace("yyyy", "%Y")
                .replace("MM", "%m")
                .replace("dd", "%d")
                .replace("HH", "%H")
                .replace("mm", "%M")
                .replace("ss", "%S");
            Ok(Value::string(dt.format(&token).to_string()))
        }
        v => {
            let f = super::as_f64(v)?;
            if let Some(digits) = style.strip_prefix('N').or_else(|| style.strip_prefix('n')) {
                let digits: usize = digits.parse().unwrap_or(2);
                Ok(Value::string(format!("{:.*}", digits, f)))
            } else {
                Ok(Value::string(as_text(v)))
            }
        }
    }
}

fn str_fn(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let f = super::as_f64(&args[0])?;
    let length = if args.len() > 1 { as_i64(&args[1])?.max(1) as usize } else { 10 };
    let decimals = if args.len() > 2 { as_i64(&args[2])?.max(0) as usize } else { 0 };
    let formatted = format!("{:.*}", decimals, f);
    Ok(Value::string(format!("{:>width$}", formatted, width = length)))
}
