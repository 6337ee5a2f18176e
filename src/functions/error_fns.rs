//! Error function category: `ERROR_MESSAGE`, `ERROR_NUMBER`,
//! `ERROR_SEVERITY`, `ERROR_STATE` — 0-arg, NULL-tolerant by nature since
//! they read the ambient `@@ERROR_*` variables and must return `Null` when
//! undeclared rather than fault.

use super::{Arity, FunctionRegistry};
use crate::error::CoreResult;
use crate::value::Value;
use crate::variables::VariableScope;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.add("ERROR_MESSAGE", Arity::fixed(0), true, |_, v| Ok(v.get("@@error_message")));
    reg.add("ERROR_NUMBER", Arity::fixed(0), true, |_, v| Ok(v.get("@@error_number")));
    reg.add("ERROR_SEVERITY", Arity::fixed(0), true, |_, v| Ok(v.get("@@error_severity")));
    reg.add("ERROR_STATE", Arity::fixed(0), true, |_, v| Ok(v.get("@@error_state")));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;

    #[test]
    fn outside_any_handler_all_four_return_null() {
        let reg = FunctionRegistry::with_builtins();
        let vars = VariableScope::new();
        for name in ["ERROR_MESSAGE", "ERROR_NUMBER", "ERROR_SEVERITY", "ERROR_STATE"] {
            assert_eq!(reg.invoke(name, &[], &vars).unwrap(), Value::Null);
        }
    }

    #[test]
    fn inside_handler_reads_set_error_state() {
        let reg = FunctionRegistry::with_builtins();
        let mut vars = VariableScope::new();
        vars.set_error_state("x", 50001, 16, 1);
        assert_eq!(reg.invoke("ERROR_MESSAGE", &[], &vars).unwrap(), Value::string("x"));
        assert_eq!(reg.invoke("ERROR_NUMBER", &[], &vars).unwrap(), Value::int(50001));
    }
}
