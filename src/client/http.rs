//! Client – HTTP
//! =============
//!
//! Blocking client for llama-server's `/v1/completions`, backed by [`ureq`].
//!
//! ## Design Highlights
//! * **Live endpoint** – the base URL sits behind a lock and is read on
//!   every request, so a server relaunched on another port is picked up by
//!   the very next call.
//! * **Two agents** – one bounded end‑to‑end by the configured timeout for
//!   blocking calls, one bounded up to the response head for streams, whose
//!   bodies may legitimately outlive the timeout. Within a stream body the
//!   same timeout applies to each gap between lines.
//! * **No retries** – every transport failure surfaces on the first
//!   attempt.

use std::{
    io::{BufReader, Read},
    sync::RwLock,
    time::Duration,
};

use ureq::Agent;
use url::Url;

use crate::{
    client::{
        codec::{COMPLETIONS_PATH, GenerationRequest, decode_completion, encode_request},
        error::ClientError,
        params::GenerationParameters,
        stream::{CompletionStream, IdleDeadline, SseLines},
    },
    config::BackendConfig,
    error::{BackendError, BackendResult},
};

/// Where requests go and how long they may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    /// e.g. `http://127.0.0.1:5001`, without a trailing slash.
    pub base_url: String,
    pub timeout: Duration,
}

impl ServerEndpoint {
    pub fn new(base_url: &str, timeout: Duration) -> BackendResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        debug_assert!(path.starts_with('/'));
        format!("{}{}", self.base_url, path)
    }
}

fn normalize_base_url(base_url: &str) -> BackendResult<String> {
    let parsed = Url::parse(base_url)
        .map_err(|e| BackendError::config("base_url", format!("`{base_url}`: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => (),
        other => {
            return Err(BackendError::config(
                "base_url",
                format!("`{base_url}`: unsupported scheme `{other}`"),
            ));
        }
    }
    if parsed.host_str().is_none() {
        return Err(BackendError::config(
            "base_url",
            format!("`{base_url}` has no host"),
        ));
    }
    Ok(base_url.trim().trim_end_matches('/').to_string())
}

pub struct HttpGenerationClient {
    /// Timeout applies to connect + send + full body.
    agent: Agent,
    /// Timeout applies up to the response head only.
    stream_agent: Agent,
    endpoint: RwLock<ServerEndpoint>,
}

impl HttpGenerationClient {
    pub fn new(base_url: &str, timeout: Duration) -> BackendResult<Self> {
        Self::with_stream_timeout(base_url, timeout, None)
    }

    /// `stream_body_timeout` caps how long a streamed body may take in
    /// total; `None` leaves it unbounded.
    pub fn with_stream_timeout(
        base_url: &str,
        timeout: Duration,
        stream_body_timeout: Option<Duration>,
    ) -> BackendResult<Self> {
        let endpoint = ServerEndpoint::new(base_url, timeout)?;

        let agent = Agent::new_with_config(
            Agent::config_builder()
                .timeout_global(Some(timeout)) // applies to connect + read + write
                .build(),
        );
        let stream_agent = Agent::new_with_config(
            Agent::config_builder()
                .timeout_connect(Some(timeout))
                .timeout_recv_response(Some(timeout))
                .timeout_recv_body(stream_body_timeout)
                .build(),
        );

        let client = Self {
            agent,
            stream_agent,
            endpoint: RwLock::new(endpoint),
        };
        crate::trace!("Client created: {client}");
        Ok(client)
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        Self::with_stream_timeout(
            &config.base_url,
            config.timeout(),
            config.stream_timeout(),
        )
    }

    /// Snapshot of the current endpoint.
    pub fn endpoint(&self) -> ServerEndpoint {
        self.endpoint
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn base_url(&self) -> String {
        self.endpoint().base_url
    }

    /// Points every subsequent request at `base_url`.
    pub fn set_base_url(&self, base_url: &str) -> BackendResult<()> {
        let normalized = normalize_base_url(base_url)?;
        let mut endpoint = self
            .endpoint
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if endpoint.base_url != normalized {
            crate::info!("Endpoint moved: {} -> {}", endpoint.base_url, normalized);
            endpoint.base_url = normalized;
        }
        Ok(())
    }

    /// Non-streaming completion.
    ///
    /// # Errors
    /// * [`BackendError::Transport`] – connection failure, timeout, non‑2xx
    ///   status, or a body that is not JSON.
    /// * [`BackendError::Protocol`] – JSON without `choices[0].text`.
    pub fn generate(&self, prompt: &str, params: &GenerationParameters) -> BackendResult<String> {
        let endpoint = self.endpoint();
        let request = encode_request(prompt, params, false);
        let response = self.post(&self.agent, &endpoint, &request)?;

        let mut body = Vec::new();
        response
            .into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| ClientError::from_io(e, endpoint.timeout))?;

        let json: serde_json::Value = serde_json::from_slice(&body).map_err(ClientError::from)?;
        let text = decode_completion(&json);
        if text.is_empty() {
            crate::warn!("No text in completion response from {}", endpoint.base_url);
            return Err(BackendError::unrecognized_response(&body));
        }
        Ok(text)
    }

    /// Streaming completion.
    ///
    /// Status errors surface here; failures while reading the body surface
    /// as an `Err` item at the point the consumer reaches them. A server that
    /// sends nothing for longer than the endpoint timeout ends the stream
    /// with [`ClientError::Timeout`].
    pub fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParameters,
    ) -> BackendResult<CompletionStream<impl Iterator<Item = std::io::Result<String>>>> {
        let endpoint = self.endpoint();
        let request = encode_request(prompt, params, true);
        let response = self.post(&self.stream_agent, &endpoint, &request)?;

        let reader = BufReader::new(response.into_body().into_reader());
        let lines = IdleDeadline::spawn(SseLines::new(reader), endpoint.timeout)
            .map_err(|e| ClientError::Setup {
                reason: format!("cannot start stream reader: {e}"),
            })?;
        Ok(CompletionStream::new(lines, endpoint.timeout))
    }

    /// llama-server's completion API has no cancel endpoint, so there is
    /// nothing to do. Exists so callers can treat every backend alike.
    pub fn abort(&self) {
        crate::trace!("abort requested; llama-server has no cancel endpoint");
    }

    fn post(
        &self,
        agent: &Agent,
        endpoint: &ServerEndpoint,
        request: &GenerationRequest,
    ) -> BackendResult<ureq::http::Response<ureq::Body>> {
        let url = endpoint.url(COMPLETIONS_PATH);
        let body = serde_json::to_vec(request).map_err(ClientError::from)?;
        crate::debug!(
            "POST {url} (stream={}, {} bytes)",
            request.is_stream(),
            body.len()
        );

        let response = agent
            .post(&url)
            .content_type("application/json")
            .send(body.as_slice());

        match response {
            Ok(resp) if resp.status().is_success() => Ok(resp),
            Ok(resp) => Err(ClientError::Remote {
                code: resp.status().as_u16(),
                message: resp
                    .status()
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
            }
            .into()),
            Err(e) => Err(ClientError::from_ureq(e, endpoint.timeout).into()),
        }
    }
}

impl std::fmt::Display for HttpGenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HttpGenerationClient({:#?})", self.base_url())
    }
}

impl std::fmt::Debug for HttpGenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGenerationClient")
            .field("endpoint", &self.endpoint())
            .finish_non_exhaustive()
    }
}
