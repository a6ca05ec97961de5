//! Client – Generation Parameters
//! ==============================
//!
//! Sampling knobs understood by `/v1/completions`. Callers either build a
//! typed [`GenerationParameters`] (unset fields take the defaults below) or
//! hand over a loose JSON object, e.g. straight from a UI form, and let
//! [`GenerationParameters::from_map`] coerce it.
//!
//! | key              | type            | default |
//! |------------------|-----------------|---------|
//! | `max_new_tokens` | positive int    | 400     |
//! | `temperature`    | float ≥ 0       | 0.7     |
//! | `top_p`          | float in [0, 1] | 0.95    |
//! | `top_k`          | int ≥ 0         | 40      |
//! | `repeat_penalty` | float           | 1.1     |

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BackendError, BackendResult};

pub const DEFAULT_MAX_NEW_TOKENS: u32 = 400;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.95;
pub const DEFAULT_TOP_K: u32 = 40;
pub const DEFAULT_REPEAT_PENALTY: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct GenerationParameters {
    /// Upper bound on generated tokens; sent as `max_tokens`.
    #[builder(default = DEFAULT_MAX_NEW_TOKENS)]
    pub max_new_tokens: u32,
    #[builder(default = DEFAULT_TEMPERATURE)]
    pub temperature: f64,
    #[builder(default = DEFAULT_TOP_P)]
    pub top_p: f64,
    /// `0` disables top‑k filtering on llama-server.
    #[builder(default = DEFAULT_TOP_K)]
    pub top_k: u32,
    #[builder(default = DEFAULT_REPEAT_PENALTY)]
    pub repeat_penalty: f64,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        GenerationParameters::builder().build()
    }
}

impl GenerationParameters {
    /// Reads the recognised keys from `map`, falling back to the default for
    /// every key that is absent. Unknown keys are ignored.
    ///
    /// # Errors
    /// [`BackendError::TypeConversion`] when a present value cannot be
    /// coerced to the declared type.
    pub fn from_map(map: &Map<String, Value>) -> BackendResult<Self> {
        Ok(Self {
            max_new_tokens: coerce_uint(map, "max_new_tokens", DEFAULT_MAX_NEW_TOKENS, true)?,
            temperature: coerce_float(map, "temperature", DEFAULT_TEMPERATURE)?,
            top_p: coerce_float(map, "top_p", DEFAULT_TOP_P)?,
            top_k: coerce_uint(map, "top_k", DEFAULT_TOP_K, false)?,
            repeat_penalty: coerce_float(map, "repeat_penalty", DEFAULT_REPEAT_PENALTY)?,
        })
    }
}

impl TryFrom<&Map<String, Value>> for GenerationParameters {
    type Error = BackendError;

    fn try_from(map: &Map<String, Value>) -> BackendResult<Self> {
        Self::from_map(map)
    }
}

impl TryFrom<&Value> for GenerationParameters {
    type Error = BackendError;

    fn try_from(value: &Value) -> BackendResult<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::Null => Ok(Self::default()),
            other => Err(BackendError::TypeConversion {
                key: "params",
                expected: "object",
                found: describe(other),
            }),
        }
    }
}

fn conversion_error(key: &'static str, expected: &'static str, found: &Value) -> BackendError {
    BackendError::TypeConversion {
        key,
        expected,
        found: describe(found),
    }
}

fn describe(value: &Value) -> String {
    const MAX: usize = 64;
    let text = value.to_string();
    if text.chars().count() > MAX {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    } else {
        text
    }
}

/// Integers accept other integers, floats (truncated toward zero), integral
/// strings and booleans.
fn coerce_uint(
    map: &Map<String, Value>,
    key: &'static str,
    default: u32,
    positive: bool,
) -> BackendResult<u32> {
    let expected = if positive {
        "positive integer"
    } else {
        "non-negative integer"
    };
    let Some(value) = map.get(key) else {
        return Ok(default);
    };

    let wide: i128 = match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u as i128
            } else if let Some(i) = n.as_i64() {
                i as i128
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() => f.trunc() as i128,
                    _ => return Err(conversion_error(key, expected, value)),
                }
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|_| conversion_error(key, expected, value))?,
        Value::Bool(b) => *b as i128,
        _ => return Err(conversion_error(key, expected, value)),
    };

    let floor = if positive { 1 } else { 0 };
    if wide < floor {
        return Err(conversion_error(key, expected, value));
    }
    u32::try_from(wide).map_err(|_| conversion_error(key, expected, value))
}

/// Floats accept any JSON number, numeric strings and booleans. NaN and the
/// infinities are rejected; they would serialize as `null`.
fn coerce_float(map: &Map<String, Value>, key: &'static str, default: f64) -> BackendResult<f64> {
    let Some(value) = map.get(key) else {
        return Ok(default);
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| conversion_error(key, "finite float", value))
}
