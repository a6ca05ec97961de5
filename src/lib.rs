//! llama_server_backend – a Rust backend for `llama.cpp`'s [`llama-server`](https://github.com/ggml-org/llama.cpp/tree/master/tools/server)
//! =====================================================================================================================================
//!
//! ## Generation
//! - **Blocking** – [`Backend::generate`] posts to `/v1/completions` and returns the text.
//! - **Streaming** – [`Backend::generate_stream`] returns a [`CompletionStream`] that yields
//!   deltas in arrival order and closes the connection as soon as it is dropped.
//! - **Loose parameters** – [`GenerationParameters`] can be built from JSON maps whose values are
//!   strings, floats or bools; bad values surface as [`BackendError::TypeConversion`].
//!
//! ## Supervision
//! - **Start/stop** – [`Backend::start`] launches `llama-server` in its own process group and
//!   re-points the client at it; [`Backend::stop`] signals the whole group, waits a grace period,
//!   then force-kills.
//! - **Model catalog** – keys map to GGUF files in a models directory; missing files can be
//!   fetched in the background with [`Backend::ensure_model`].
//!
//! ## CLI
//! - **`llama-backend-cli`** – `generate`, `stream`, `serve` and `models` sub-commands.
//!
//! ---
//!
//! ```rust,no_run
//! use llama_server_backend::*;
//!
//! fn main() -> BackendResult<()> {
//!     let backend = Backend::new(&BackendConfig::default())?;
//!
//!     backend.start(
//!         &StartArgs::builder()
//!             .executable("llama-server")
//!             .model_key("gemma-3-1b")
//!             .build(),
//!     )?;
//!
//!     let params = GenerationParameters::builder().max_new_tokens(64).build();
//!     for delta in backend.generate_stream("Tell me a joke about Rust.", &params)? {
//!         print!("{}", delta?);
//!     }
//!
//!     println!("\n{}", backend.stop());
//!     Ok(())
//! }
//! ```
//!
//! ---
//!
//! ## How It Works
//!
//! ```text
//! Backend
//!   ├─→ HttpGenerationClient   POST /v1/completions (ureq)
//!   │         └─→ CompletionStream   data: {…} … data: [DONE]
//!   └─→ ServerSupervisor       spawn / signal / reap llama-server
//!             ├─→ ModelCatalog       key → models/<file>.gguf
//!             └─→ TerminateGroup     killpg on Unix, CTRL_BREAK + job kill on Windows
//! ```

#[allow(unused_imports)]
use tracing::{Level, debug, error, info, span, trace, warn};

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;

pub use backend::Backend;
pub use client::{
    codec::{COMPLETIONS_PATH, GenerationRequest, decode_completion, encode_request},
    error::ClientError,
    http::{HttpGenerationClient, ServerEndpoint},
    params::GenerationParameters,
    stream::{CompletionStream, StreamEvent},
};
pub use config::BackendConfig;
pub use error::{BackendError, BackendResult};
pub use logging::init_logging;
pub use server::{
    catalog::{CatalogEntry, ModelAvailability, ModelCatalog},
    process::{PlatformTerminator, ProcessError, ProcessHandle, TerminateGroup},
    supervisor::{ServerSupervisor, StartArgs, StartOutcome, StopOutcome},
};
