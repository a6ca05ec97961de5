//! Client – Codec
//! ==============
//!
//! Pure translation between [`GenerationParameters`] and the
//! `/v1/completions` wire format.
//!
//! ```text
//! encode_request(prompt, params, stream)
//!   ─▶ {"prompt", "max_tokens", "temperature", "top_p",
//!       "top_k", "repeat_penalty", "stream"}
//!
//! decode_completion({"choices":[{"text":"…"}, …]}) ─▶ "…"
//! ```

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::client::params::GenerationParameters;

/// Route of the OpenAI-style completion endpoint on llama-server.
pub const COMPLETIONS_PATH: &str = "/v1/completions";

/// One completion call: prompt, sampling parameters and transfer mode.
///
/// Built fresh for every request and never mutated afterwards; serializes
/// directly into the request body.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    params: GenerationParameters,
    stream: bool,
}

impl GenerationRequest {
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn params(&self) -> &GenerationParameters {
        &self.params
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }
}

#[derive(Serialize)]
struct WirePayload<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    top_k: u32,
    repeat_penalty: f64,
    stream: bool,
}

impl Serialize for GenerationRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WirePayload {
            prompt: &self.prompt,
            max_tokens: self.params.max_new_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            top_k: self.params.top_k,
            repeat_penalty: self.params.repeat_penalty,
            stream: self.stream,
        }
        .serialize(serializer)
    }
}

pub fn encode_request(
    prompt: impl Into<String>,
    params: &GenerationParameters,
    stream: bool,
) -> GenerationRequest {
    GenerationRequest {
        prompt: prompt.into(),
        params: *params,
        stream,
    }
}

/// Text of the first choice, or `""` when the body has no such field.
///
/// An empty result means "nothing extracted"; callers decide whether that is
/// an error. A JSON `null` text counts as absent, so it yields `""` rather
/// than a literal `"None"` or `"null"`. Any other non-string value is rendered
/// as its JSON text.
pub fn decode_completion(body: &Value) -> String {
    let text = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(Value::as_object)
        .and_then(|choice| choice.get("text"));

    match text {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
