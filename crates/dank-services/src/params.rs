//! Typed access to request params.
//!
//! Every getter reports a missing or mistyped field the same way:
//! `missing or invalid <name> parameter`.

use dank_protocol::{HandlerError, Params};

pub fn str_param<'a>(params: &'a Params, name: &str) -> Result<&'a str, HandlerError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerError::invalid_param(name))
}

/// Integer param. JSON floats are truncated.
pub fn int_param(params: &Params, name: &str) -> Result<i64, HandlerError> {
    opt_int_param(params, name)?.ok_or_else(|| HandlerError::invalid_param(name))
}

pub fn opt_int_param(params: &Params, name: &str) -> Result<Option<i64>, HandlerError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| HandlerError::invalid_param(name)),
    }
}

pub fn opt_f64_param(params: &Params, name: &str) -> Result<Option<f64>, HandlerError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| HandlerError::invalid_param(name)),
    }
}

pub fn opt_bool_param(params: &Params, name: &str) -> Result<Option<bool>, HandlerError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| HandlerError::invalid_param(name)),
    }
}

/// List of strings. Non-string entries are skipped.
pub fn string_list_param(params: &Params, name: &str) -> Vec<String> {
    params
        .get(name)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
