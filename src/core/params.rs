//! Contract invocation parameters
//!
//! Parses the JSON parameter form used by Neo RPC (`{"type": ..., "value": ...}`)
//! and emits each parameter onto the NeoVM evaluation stack.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

use super::script::{opcode, ScriptBuilder};
use super::types::{ScriptHash, TxHash};
use crate::crypto::keys::PublicKey;

/// Deepest nesting accepted for array parameters
pub const MAX_PARAMETER_DEPTH: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Unsupported parameter type: {0}")]
    UnsupportedType(String),
    #[error("Invalid {kind} value: {value}")]
    InvalidValue { kind: &'static str, value: String },
    #[error("Parameter nesting deeper than {0}")]
    TooDeep(usize),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// A typed contract argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractParameter {
    Any,
    Boolean(bool),
    Integer(i128),
    ByteArray(Vec<u8>),
    String(String),
    Hash160(ScriptHash),
    Hash256(TxHash),
    PublicKey(PublicKey),
    Signature(Vec<u8>),
    Array(Vec<ContractParameter>),
}

impl ContractParameter {
    /// Parse a single `{"type", "value"}` object
    pub fn from_json(value: &Value) -> Result<Self, ParseError> {
        Self::from_json_at(value, 0)
    }

    /// Parse a JSON array of parameters
    pub fn list_from_json(value: &Value) -> Result<Vec<Self>, ParseError> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items.iter().map(Self::from_json).collect(),
            other => Err(ParseError::InvalidValue {
                kind: "parameter list",
                value: other.to_string(),
            }),
        }
    }

    fn from_json_at(value: &Value, depth: usize) -> Result<Self, ParseError> {
        if depth > MAX_PARAMETER_DEPTH {
            return Err(ParseError::TooDeep(MAX_PARAMETER_DEPTH));
        }
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingField("type"))?;
        let inner = value.get("value").unwrap_or(&Value::Null);

        match kind {
            "Any" => Ok(ContractParameter::Any),
            "Boolean" => match inner {
                Value::Bool(b) => Ok(ContractParameter::Boolean(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => {
                    Ok(ContractParameter::Boolean(true))
                }
                Value::String(s) if s.eq_ignore_ascii_case("false") => {
                    Ok(ContractParameter::Boolean(false))
                }
                other => Err(invalid("Boolean", other)),
            },
            "Integer" => {
                let text = match inner {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    other => return Err(invalid("Integer", other)),
                };
                text.parse::<i128>()
                    .map(ContractParameter::Integer)
                    .map_err(|_| ParseError::InvalidValue {
                        kind: "Integer",
                        value: text,
                    })
            }
            "ByteArray" => Ok(ContractParameter::ByteArray(decode_base64("ByteArray", inner)?)),
            "Signature" => Ok(ContractParameter::Signature(decode_base64("Signature", inner)?)),
            "String" => match inner {
                Value::String(s) => Ok(ContractParameter::String(s.clone())),
                other => Err(invalid("String", other)),
            },
            "Hash160" => {
                let text = inner.as_str().ok_or_else(|| invalid("Hash160", inner))?;
                ScriptHash::parse_any(text)
                    .map(ContractParameter::Hash160)
                    .map_err(|_| invalid("Hash160", inner))
            }
            "Hash256" => {
                let text = inner.as_str().ok_or_else(|| invalid("Hash256", inner))?;
                text.parse::<TxHash>()
                    .map(ContractParameter::Hash256)
                    .map_err(|_| invalid("Hash256", inner))
            }
            "PublicKey" => {
                let text = inner.as_str().ok_or_else(|| invalid("PublicKey", inner))?;
                PublicKey::from_hex(text)
                    .map(ContractParameter::PublicKey)
                    .map_err(|_| invalid("PublicKey", inner))
            }
            "Array" => match inner {
                Value::Array(items) => items
                    .iter()
                    .map(|item| Self::from_json_at(item, depth + 1))
                    .collect::<Result<Vec<_>, _>>()
                    .map(ContractParameter::Array),
                other => Err(invalid("Array", other)),
            },
            other => Err(ParseError::UnsupportedType(other.to_string())),
        }
    }

    /// Push this parameter onto the evaluation stack
    pub fn emit(&self, sb: &mut ScriptBuilder) {
        match self {
            ContractParameter::Any => {
                sb.emit_push_null();
            }
            ContractParameter::Boolean(b) => {
                sb.emit_push_bool(*b);
            }
            ContractParameter::Integer(i) => {
                sb.emit_push_int(*i);
            }
            ContractParameter::ByteArray(bytes) | ContractParameter::Signature(bytes) => {
                sb.emit_push_bytes(bytes);
            }
            ContractParameter::String(s) => {
                sb.emit_push_str(s);
            }
            ContractParameter::Hash160(hash) => {
                sb.emit_push_bytes(hash.as_bytes());
            }
            ContractParameter::Hash256(hash) => {
                sb.emit_push_bytes(hash.as_bytes());
            }
            ContractParameter::PublicKey(key) => {
                sb.emit_push_bytes(key.as_bytes());
            }
            ContractParameter::Array(items) => {
                for item in items.iter().rev() {
                    item.emit(sb);
                }
                sb.emit_push_int(items.len() as i128);
                sb.emit(opcode::PACK);
            }
        }
    }
}

fn invalid(kind: &'static str, value: &Value) -> ParseError {
    ParseError::InvalidValue {
        kind,
        value: value.to_string(),
    }
}

fn decode_base64(kind: &'static str, value: &Value) -> Result<Vec<u8>, ParseError> {
    let text = value.as_str().ok_or_else(|| invalid(kind, value))?;
    BASE64.decode(text).map_err(|_| invalid(kind, value))
}

/// Convert a decimal amount string into integer base units
///
/// `parse_amount("1.5", 8)` is `150_000_000`. Negative values, more
/// fractional digits than `decimals`, and overflow are rejected.
pub fn parse_amount(input: &str, decimals: u8) -> Result<i128, ParseError> {
    let err = || ParseError::InvalidAmount(input.to_string());
    let text = input.trim();
    let (whole, fraction) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(err());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(err());
    }
    if fraction.len() > decimals as usize {
        return Err(err());
    }

    let scale = 10i128.checked_pow(decimals as u32).ok_or_else(err)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<i128>().map_err(|_| err())?
    };
    let fraction_units = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded.parse::<i128>().map_err(|_| err())?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(err)
}
