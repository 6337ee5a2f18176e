//! JSON function category: `JSON_VALUE`, `JSON_QUERY`, `ISJSON`,
//! `JSON_MODIFY`.
//!
//! Path syntax: `$`, `.member`, `[index]`. Missing paths and type mismatches
//! both yield `Null` — they never fault.

use super::{as_text, Arity, FunctionRegistry};
use crate::error::CoreResult;
use crate::value::Value;
use crate::variables::VariableScope;
use serde_json::Value as Json;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.add("JSON_VALUE", Arity::fixed(2), false, json_value);
    reg.add("JSON_QUERY", Arity::fixed(2), false, json_query);
    reg.add("ISJSON", Arity::fixed(1), false, isjson);
    reg.add("JSON_MODIFY", Arity::fixed(3), false, json_modify);
}

enum Step {
    Member(String),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<Step>> {
    let path = path.strip_prefix('$')?;
    let mut steps = Vec::new();
    let mut rest = path;
    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let end = after_dot
                .find(|c| c == '.' || c == '[')
                .unwrap_or(after_dot.len());
            if end == 0 {
                return None;
            }
            steps.push(Step::Member(after_dot[..end].to_string()));
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let end = after_bracket.find(']')?;
            let idx: usize = after_bracket[..end].parse().ok()?;
            steps.push(Step::Index(idx));
            rest = &after_bracket[end + 1..];
        } else {
            return None;
        }
    }
    Some(steps)
}

fn navigate(doc: &Json, path: &str) -> Option<Json> {
    let steps = parse_path(path)?;
    let mut current = doc.clone();
    for step in steps {
        current = match step {
            Step::Member(name) => current.get(&name)?.clone(),
            Step::Index(i) => current.get(i)?.clone(),
        };
    }
    Some(current)
}

fn json_value(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let doc: Json = match serde_json::from_str(&as_text(&args[0])) {
        Ok(d) => d,
        Err(_) => return Ok(Value::Null),
    };
    let path = as_text(&args[1]);
    match navigate(&doc, &path) {
        Some(Json::String(s)) => Ok(Value::string(s)),
        Some(Json::Number(n)) => Ok(Value::string(n.to_string())),
        Some(Json::Bool(b)) => Ok(Value::string(if b { "true" } else { "false" })),
        Some(Json::Null) | None => Ok(Value::Null),
        Some(Json::Object(_)) | Some(Json::Array(_)) => Ok(Value::Null), // scalar only
    }
}

fn json_query(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let doc: Json = match serde_json::from_str(&as_text(&args[0])) {
        Ok(d) => d,
        Err(_) => return Ok(Value::Null),
    };
    let path = as_text(&args[1]);
    match navigate(&doc, &path) {
        Some(v @ (Json::Object(_) | Json::Array(_))) => Ok(Value::string(v.to_string())),
        _ => Ok(Value::Null),
    }
}

fn isjson(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let text = as_text(&args[0]);
    let ok: Json = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => return Ok(Value::int(0)),
    };
    Ok(Value::int(if ok.is_object() || ok.is_array() { 1 } else { 0 }))
}

fn json_modify(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    let mut doc: Json = match serde_json::from_str(&as_text(&args[0])) {
        Ok(d) => d,
        Err(_) => return Ok(Value::Null),
    };
    let path = as_text(&args[1]);
    let new_value_text = as_text(&args[2]);
    let new_value: Json =
        serde_json::from_str(&new_value_text).unwrap_or(Json::String(new_value_text));

    let Some(steps) = parse_path(&path) else {
        return Ok(Value::Null);
    };
    if set_at(&mut doc, &steps, new_value) {
        Ok(Value::string(doc.to_string()))
    } else {
        Ok(Value::Null)
    }
}

fn set_at(doc: &mut Json, steps: &[Step], new_value: Json) -> bool {
    if steps.is_empty() {
        return false;
    }
    let mut current = doc;
    for step in &steps[..steps.len() - 1] {
        current = match (step, current) {
            (Step::Member(name), Json::Object(map)) => match map.get_mut(name) {
                Some(v) => v,
                None => return false,
            },
            (Step::Index(i), Json::Array(arr)) => match arr.get_mut(*i) {
                Some(v) => v,
                None => return false,
            },
            _ => return false,
        };
    }
    match (&steps[steps.len() - 1], current) {
        (Step::Member(name), Json::Object(map)) => {
            map.insert(name.clone(), new_value);
            true
        }
        (Step::Index(i), Json::Array(arr)) => {
            if *i < arr.len() {
                arr[*i] = new_value;
                true
            } else {
                false
            }
        }
        _ => false,
    }
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
    fn json_value_scalar() {
        let doc = Value::string(r#"{"a":{"b":1}}"#);
        assert_eq!(invoke("JSON_VALUE", &[doc, Value::string("$.a.b")]), Value::string("1"));
    }

    #[test]
    fn json_value_missing_path_is_null() {
        let doc = Value::string(r#"{"a":1}"#);
        assert_eq!(invoke("JSON_VALUE", &[doc, Value::string("$.missing")]), Value::Null);
    }

    #[test]
    fn json_value_on_object_is_null() {
        let doc = Value::string(r#"{"a":{"b":1}}"#);
        assert_eq!(invoke("JSON_VALUE", &[doc, Value::string("$.a")]), Value::Null);
    }

    #[test]
    fn isjson_detects_validity() {
        assert_eq!(invoke("ISJSON", &[Value::string("{}")]), Value::int(1));
        assert_eq!(invoke("ISJSON", &[Value::string("not json")]), Value::int(0));
    }

    #[test]
    fn json_modify_sets_member() {
        let doc = Value::string(r#"{"a":1}"#);
        let result = invoke("JSON_MODIFY", &[doc, Value::string("$.a"), Value::string("2")]);
        assert_eq!(result, Value::string(r#"{"a":2}"#));
    }

    #[test]
    fn json_query_returns_fragment() {
        let doc = Value::string(r#"{"a":[1,2,3]}"#);
        assert_eq!(
            invoke("JSON_QUERY", &[doc, Value::string("$.a")]),
            Value::string("[1,2,3]")
        );
    }
}
