//! jq-query extraction for `JQ` output transforms, backed by jaq.
//!
//! Each extraction rule is a jq program evaluated against the parsed response
//! body. A program producing one value yields it directly; multiple outputs
//! collect into an array.

use jaq_interpret::{Ctx, FilterT, ParseCtx, RcIter, Val};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

fn run_program(program: &str, input: &Value) -> Result<Vec<Value>> {
    let mut definitions = ParseCtx::new(Vec::new());
    definitions.insert_natives(jaq_core::core());
    definitions.insert_defs(jaq_std::std());

    let (parsed, errors) = jaq_parse::parse(program, jaq_parse::main());
    if !errors.is_empty() {
        return Err(Error::TransformFailed {
            reason: format!("invalid jq program {program:?}: {:?}", errors[0]),
        });
    }
    let parsed = parsed.ok_or_else(|| Error::TransformFailed {
        reason: format!("invalid jq program {program:?}"),
    })?;

    let filter = definitions.compile(parsed);
    if !definitions.errs.is_empty() {
        return Err(Error::TransformFailed {
            reason: format!("jq program {program:?} failed to compile"),
        });
    }

    let inputs = RcIter::new(core::iter::empty());
    let mut outputs = Vec::new();
    for item in filter.run((Ctx::new([], &inputs), Val::from(input.clone()))) {
        let value = item.map_err(|err| Error::TransformFailed {
            reason: format!("jq evaluation failed: {err}"),
        })?;
        outputs.push(Value::from(value));
    }
    Ok(outputs)
}

pub fn extract(body: &[u8], rules: &std::collections::BTreeMap<String, String>) -> Result<Value> {
    let document: Value = serde_json::from_slice(body).map_err(|err| Error::ResponseParseFailed {
        reason: format!("response is not valid JSON: {err}"),
    })?;

    if rules.is_empty() {
        return Ok(document);
    }

    let mut out = Map::new();
    for (field, program) in rules {
        let outputs = run_program(program, &document)?;
        let value = match outputs.len() {
            0 => Value::Null,
            1 => outputs.into_iter().next().unwrap(),
            _ => Value::Array(outputs),
        };
        out.insert(field.clone(), value);
    }
    Ok(super::map_to_value(out))
}
