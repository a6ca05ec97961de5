//! Llama Backend CLI
//! =================
//!
//! Command-line front end for `llama_server_backend`.
//!
//! ## Typical usage
//! ```text
//! # Launch a catalogued model and keep it up until Ctrl-C
//! $ llama-backend-cli serve --exe ./llama-server --model gemma-3-1b -- --flash-attn
//!
//! # Talk to whatever is listening on the configured base URL
//! $ llama-backend-cli generate "Why is the sky blue?" --max-new-tokens 64
//! $ llama-backend-cli stream "Write a haiku about ferris" --temperature 1.0
//!
//! # Which catalogued models are on disk
//! $ llama-backend-cli models
//! ```
//!
//! Settings come from the per-user config file (or `--config`); global flags
//! override individual values for one invocation.

use std::{io::Write, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use llama_server_backend::{
    client::params::{
        DEFAULT_MAX_NEW_TOKENS, DEFAULT_REPEAT_PENALTY, DEFAULT_TEMPERATURE, DEFAULT_TOP_K,
        DEFAULT_TOP_P,
    },
    server::{
        process::ProcessError,
        supervisor::{DEFAULT_CTX_SIZE, DEFAULT_GPU_LAYERS, DEFAULT_HOST, DEFAULT_PORT},
    },
    *,
};

const APP_NAME: &str = "llama-backend";

#[derive(Debug, Parser)]
#[command(name = "llama-backend-cli", version)]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Server root, e.g. http://127.0.0.1:5001
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Model manifest (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    catalog: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR")]
    models_dir: Option<PathBuf>,

    /// trace, debug, info, warn or error; RUST_LOG wins when set
    #[arg(long, global = true, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Print a complete generation
    Generate {
        prompt: String,
        #[command(flatten)]
        sampling: Sampling,
    },

    /// Print deltas as the server produces them
    Stream {
        prompt: String,
        #[command(flatten)]
        sampling: Sampling,
    },

    /// Start llama-server and keep it running until Ctrl-C
    Serve(Serve),

    /// List catalogued models and whether their files are present
    Models,
}

#[derive(Debug, Args)]
struct Sampling {
    #[arg(long, default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    max_new_tokens: u32,
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f64,
    #[arg(long, default_value_t = DEFAULT_TOP_P)]
    top_p: f64,
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: u32,
    #[arg(long, default_value_t = DEFAULT_REPEAT_PENALTY)]
    repeat_penalty: f64,
}

impl From<Sampling> for GenerationParameters {
    fn from(s: Sampling) -> Self {
        GenerationParameters::builder()
            .max_new_tokens(s.max_new_tokens)
            .temperature(s.temperature)
            .top_p(s.top_p)
            .top_k(s.top_k)
            .repeat_penalty(s.repeat_penalty)
            .build()
    }
}

#[derive(Debug, Args)]
struct Serve {
    /// llama-server binary
    #[arg(long, value_name = "PATH")]
    exe: PathBuf,
    /// Catalog key of the model to load
    #[arg(long)]
    model: String,
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, default_value_t = DEFAULT_CTX_SIZE)]
    ctx_size: u32,
    #[arg(long, default_value_t = DEFAULT_GPU_LAYERS)]
    gpu_layers: u32,
    /// Passed through to llama-server after `--`
    #[arg(last = true)]
    extra: Vec<String>,
}

impl Cli {
    fn backend_config(&self) -> BackendResult<BackendConfig> {
        let mut config = match &self.config {
            Some(path) => BackendConfig::load_path(path)?,
            None => BackendConfig::load(APP_NAME)?,
        };
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        if let Some(catalog) = &self.catalog {
            config.catalog_path = catalog.clone();
        }
        if let Some(models_dir) = &self.models_dir {
            config.models_dir = models_dir.clone();
        }
        Ok(config)
    }
}

/// Writes and flushes one piece of streamed text. A closed pipe ends the run
/// with an error instead of discarding the rest of the stream.
fn write_delta(out: &mut impl Write, delta: &str) -> BackendResult<()> {
    out.write_all(delta.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| BackendError::file_system("write", "<stdout>", e))
}

fn main() -> BackendResult<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let backend = Backend::new(&cli.backend_config()?)?;

    match cli.cmd {
        Cmd::Generate { prompt, sampling } => {
            let text = backend.generate(&prompt, &sampling.into())?;
            println!("{text}");
        }

        Cmd::Stream { prompt, sampling } => {
            let mut stdout = std::io::stdout().lock();
            for delta in backend.generate_stream(&prompt, &sampling.into())? {
                write_delta(&mut stdout, &delta?)?;
            }
            write_delta(&mut stdout, "\n")?;
        }

        Cmd::Serve(serve) => {
            let args = StartArgs::builder()
                .executable(serve.exe)
                .model_key(serve.model)
                .host(serve.host)
                .port(serve.port)
                .ctx_size(serve.ctx_size)
                .gpu_layers(serve.gpu_layers)
                .extra_args(serve.extra)
                .build();
            println!("{}", backend.start(&args)?);
            println!("serving at {}; press Ctrl-C to stop.", backend.client().base_url());

            let (tx, rx) = std::sync::mpsc::channel();
            ctrlc::set_handler(move || {
                let _ = tx.send(());
            })
            .map_err(|e| ProcessError::CommandFailed {
                action: "install Ctrl-C handler for",
                source: e.into(),
            })?;
            let _ = rx.recv();

            println!("{}", backend.stop());
        }

        Cmd::Models => match backend.supervisor().catalog() {
            None => println!("no model catalog loaded"),
            Some(catalog) => {
                for key in catalog.keys() {
                    let path = catalog.model_path(key)?;
                    let state = if path.is_file() { "ready" } else { "missing" };
                    println!("{key:<32} {state:<8} {}", path.display());
                }
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn deltas_are_written_as_is() {
        let mut out = Vec::new();
        write_delta(&mut out, "Hello").unwrap();
        write_delta(&mut out, ", world").unwrap();
        write_delta(&mut out, "\n").unwrap();
        assert_eq!(out, b"Hello, world\n");
    }

    #[test]
    fn closed_pipe_is_file_system_error() {
        match write_delta(&mut ClosedPipe, "Hello") {
            Err(BackendError::FileSystem { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("expected FileSystem error, got {other:?}"),
        }
    }
}
