//! Backend – Facade
//! ================
//!
//! One object for everything a caller needs from a local `llama-server`:
//! text generation over HTTP and the lifecycle of the server process.
//!
//! A successful [`Backend::start`] re-points the client at the new server, so
//! the next `generate` goes to the freshly launched instance.
//!
//! Every method takes `&self`; wrap a `Backend` in an `Arc` to share it.

use crate::{
    client::{
        http::HttpGenerationClient, params::GenerationParameters, stream::CompletionStream,
    },
    config::BackendConfig,
    error::{BackendError, BackendResult},
    server::{
        catalog::{ModelAvailability, ModelCatalog},
        process::{PlatformTerminator, TerminateGroup},
        supervisor::{ServerSupervisor, StartArgs, StartOutcome, StopOutcome},
    },
};

#[derive(Debug)]
pub struct Backend<T: TerminateGroup = PlatformTerminator> {
    client: HttpGenerationClient,
    supervisor: ServerSupervisor<T>,
}

impl Backend {
    /// Builds a client for `config.base_url` and a supervisor over the model
    /// catalog at `config.catalog_path`, if one exists.
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let client = HttpGenerationClient::from_config(config)?;
        let catalog =
            ModelCatalog::load_if_present(&config.catalog_path, config.models_dir.clone())?;
        let supervisor = ServerSupervisor::new(catalog).with_grace_period(config.grace_period());
        Ok(Self::with_parts(client, supervisor))
    }
}

impl<T: TerminateGroup> Backend<T> {
    pub fn with_parts(client: HttpGenerationClient, supervisor: ServerSupervisor<T>) -> Self {
        Self { client, supervisor }
    }

    pub fn client(&self) -> &HttpGenerationClient {
        &self.client
    }

    pub fn supervisor(&self) -> &ServerSupervisor<T> {
        &self.supervisor
    }

    /// Blocking completion; see [`HttpGenerationClient::generate`].
    pub fn generate(&self, prompt: &str, params: &GenerationParameters) -> BackendResult<String> {
        self.client.generate(prompt, params)
    }

    /// Streaming completion; see [`HttpGenerationClient::generate_stream`].
    pub fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParameters,
    ) -> BackendResult<CompletionStream<impl Iterator<Item = std::io::Result<String>>>> {
        self.client.generate_stream(prompt, params)
    }

    pub fn abort(&self) {
        self.client.abort()
    }

    pub fn start(&self, args: &StartArgs) -> BackendResult<StartOutcome> {
        let outcome = self.supervisor.start(args)?;
        if let StartOutcome::Started { base_url, .. } = &outcome {
            self.client.set_base_url(base_url)?;
        }
        Ok(outcome)
    }

    pub fn stop(&self) -> StopOutcome {
        self.supervisor.stop()
    }

    /// Makes sure the model file for `key` is on disk or on its way there.
    pub fn ensure_model(&self, key: &str) -> BackendResult<ModelAvailability> {
        self.supervisor
            .catalog()
            .ok_or_else(|| BackendError::config("model_catalog", "no model catalog loaded"))?
            .ensure_downloaded(key)
    }
}
