//! Shared helpers for the integration-test suite.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use llama_server_backend::*;

pub const MODEL_KEY: &str = "tiny";

/// Config rooted in `dir`, pointing the client at `base_url`.
pub fn config_in(dir: &Path, base_url: &str) -> BackendConfig {
    BackendConfig::builder()
        .base_url(base_url)
        .timeout_secs(5)
        .catalog_path(dir.join("llm.json"))
        .models_dir(dir.join("models"))
        .grace_period_secs(1)
        .build()
}

/// Writes a one-model manifest and its model file under `dir`.
pub fn write_catalog(dir: &Path) -> PathBuf {
    let models = dir.join("models");
    std::fs::create_dir_all(&models).unwrap();
    std::fs::write(models.join("tiny.gguf"), b"GGUF").unwrap();
    std::fs::write(
        dir.join("llm.json"),
        format!(r#"{{"{MODEL_KEY}": {{"urls": ["https://models.test/repo/tiny.gguf"]}}}}"#),
    )
    .unwrap();
    models.join("tiny.gguf")
}

/// Backend against `base_url` with a catalog and a 1 s grace period.
pub fn backend_in(dir: &Path, base_url: &str) -> Backend {
    write_catalog(dir);
    Backend::new(&config_in(dir, base_url)).unwrap()
}

/// Body of an event stream carrying `deltas`, closed by `[DONE]`.
pub fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        body.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"text": delta}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Executable stand-in for `llama-server` that sleeps and ignores its
/// arguments. With `ignore_term` it also ignores SIGTERM.
#[cfg(unix)]
pub fn fake_server(dir: &Path, ignore_term: bool) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(if ignore_term {
        "stubborn-server.sh"
    } else {
        "fake-server.sh"
    });
    let trap = if ignore_term { "trap '' TERM\n" } else { "" };
    std::fs::write(&path, format!("#!/bin/sh\n{trap}sleep 30\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
    !matches!(kill(Pid::from_raw(pid as i32), None), Err(Errno::ESRCH))
}

pub fn start_args(exe: &Path, port: u16) -> StartArgs {
    StartArgs::builder()
        .executable(exe)
        .model_key(MODEL_KEY)
        .port(port)
        .build()
}
