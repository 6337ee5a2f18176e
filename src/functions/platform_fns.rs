//! Platform-specific function category: `CREATEELASTICLOOKUP`.

use super::{as_text, Arity, FunctionRegistry};
use crate::error::CoreResult;
use crate::value::Value;
use crate::variables::VariableScope;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.add("CREATEELASTICLOOKUP", Arity::fixed(4), false, create_elastic_lookup);
}

/// `CREATEELASTICLOOKUP(entity, logicalName, id, partitionId) ->
/// "entity:logicalName:id:partitionId"`. Default NULL propagation already
/// covers the "any Null arg -> Null" rule since this function is not in the
/// NULL-tolerant set.
fn create_elastic_lookup(args: &[Value], _: &VariableScope) -> CoreResult<Value> {
    Ok(Value::string(format!(
        "{}:{}:{}:{}",
        as_text(&args[0]),
        as_text(&args[1]),
        as_text(&args[2]),
        as_text(&args[3]),
    )))
}
