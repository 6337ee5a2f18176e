//! NULL-handling function category: `ISNULL`, `COALESCE`. Both are
//! NULL-tolerant by definition — they exist specifically to handle `Null`
//! arguments.

use super::{Arity, FunctionRegistry};
use crate::error::CoreResult;
use crate::value::Value;
use crate::variables::VariableScope;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.add("ISNULL", Arity::fixed(2), true, isnull);
    reg.add("COALESCE", Arity::at_least(1), true, coalesce);
}

fn isnull(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(if args[0].is_null() { args[1].clone() } else { args[0].clone() })
}

fn coalesce(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(args
        .iter()
        .find(|a| !a.is_null())
        .cloned()
        .unwrap_or(Value::Null))
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
    fn isnull_picks_first_nonnull() {
        assert_eq!(invoke("ISNULL", &[Value::Null, Value::int(5)]), Value::int(5));
        assert_eq!(invoke("ISNULL", &[Value::int(1), Value::int(5)]), Value::int(1));
    }

    #[test]
    fn coalesce_variadic_first_nonnull() {
        assert_eq!(
            invoke("COALESCE", &[Value::Null, Value::Null, Value::int(3), Value::int(4)]),
            Value::int(3)
        );
    }

    #[test]
    fn coalesce_all_null_is_null() {
        assert_eq!(invoke("COALESCE", &[Value::Null, Value::Null]), Value::Null);
    }
}
