//! Response reshaping ahead of typed parsing
//!
//! Esplora returns some endpoints as a bare scalar (the tip height is just
//! `812345`) and carries satoshi amounts as JSON numbers. Bare scalars are
//! wrapped into a one-element array, and money-bearing documents have every
//! numeric leaf rewritten to its decimal string so amounts are never routed
//! through floating point.

use serde_json::Value;

use crate::error::{WalletError, WalletResult};

/// How a response body is prepared before typed parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Body is JSON and parsed as is
    Json,
    /// Body may be a bare scalar; wrap it and stringify numbers
    WrapScalar,
    /// Body is a JSON document carrying amounts; stringify numbers
    AmountsAsStrings,
}

/// Wrap a bare JSON scalar into a one-element array
pub fn wrap_bare_scalar(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        format!("[{}]", trimmed)
    }
}

/// Rewrite every numeric leaf to a quoted decimal string
pub fn stringify_numbers(value: &mut Value) {
    match value {
        Value::Number(number) => *value = Value::String(number.to_string()),
        Value::Array(items) => items.iter_mut().for_each(stringify_numbers),
        Value::Object(map) => map.values_mut().for_each(stringify_numbers),
        _ => {}
    }
}

pub fn shape_response(body: &[u8], shape: ResponseShape) -> WalletResult<Value> {
    let text = std::str::from_utf8(body)
        .map_err(|e| WalletError::parsing(format!("response is not UTF-8: {}", e)))?;

    let mut value: Value = match shape {
        ResponseShape::WrapScalar => serde_json::from_str(&wrap_bare_scalar(text))?,
        ResponseShape::Json | ResponseShape::AmountsAsStrings => serde_json::from_str(text)?,
    };

    if shape != ResponseShape::Json {
        stringify_numbers(&mut value);
    }
    Ok(value)
}
