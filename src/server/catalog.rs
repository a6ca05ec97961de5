//! Server – Model Catalog
//! =====================
//!
//! Maps a model *key* (the value shown in a model picker) to the GGUF file
//! the server should load. The manifest is a JSON object:
//!
//! ```json
//! { "gemma-3-1b": { "urls": ["https://huggingface.co/…/gemma-3-1b-Q4_K_M.gguf"] } }
//! ```
//!
//! The local file for a key is `<models_dir>/<last path segment of urls[0]>`.
//! [`ModelCatalog::ensure_downloaded`] fetches a missing file in the
//! background.

use std::{
    collections::{BTreeMap, HashSet},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    client::error::ClientError,
    error::{BackendError, BackendResult},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Download locations; the first one names the local file.
    pub urls: Vec<String>,
}

/// Whether a model file can be handed to the server right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelAvailability {
    Ready(PathBuf),
    /// A background download to this path is in progress.
    Downloading(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: BTreeMap<String, CatalogEntry>,
    models_dir: PathBuf,
    /// Destinations with a live download thread.
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ModelCatalog {
    pub fn new(entries: BTreeMap<String, CatalogEntry>, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            entries,
            models_dir: models_dir.into(),
            in_flight: Arc::default(),
        }
    }

    pub fn load(manifest: &Path, models_dir: impl Into<PathBuf>) -> BackendResult<Self> {
        let raw = std::fs::read_to_string(manifest)
            .map_err(|e| BackendError::file_system("read model manifest", manifest, e))?;
        let entries: BTreeMap<String, CatalogEntry> = serde_json::from_str(&raw).map_err(|e| {
            BackendError::config("model_catalog", format!("{}: {e}", manifest.display()))
        })?;
        crate::debug!(
            "Loaded {} models from {}",
            entries.len(),
            manifest.display()
        );
        Ok(Self::new(entries, models_dir))
    }

    /// `Ok(None)` when there is no manifest at `manifest`.
    pub fn load_if_present(
        manifest: &Path,
        models_dir: impl Into<PathBuf>,
    ) -> BackendResult<Option<Self>> {
        if manifest.is_file() {
            Self::load(manifest, models_dir).map(Some)
        } else {
            crate::info!(
                "No model manifest at {}; server start-up disabled",
                manifest.display()
            );
            Ok(None)
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    fn entry(&self, key: &str) -> BackendResult<&CatalogEntry> {
        self.entries
            .get(key)
            .ok_or_else(|| BackendError::config("model_key", format!("unknown model `{key}`")))
    }

    fn primary_url(&self, key: &str) -> BackendResult<Url> {
        let entry = self.entry(key)?;
        let raw = entry.urls.first().ok_or_else(|| {
            BackendError::config("model_catalog", format!("model `{key}` lists no urls"))
        })?;
        Url::parse(raw).map_err(|e| {
            BackendError::config("model_catalog", format!("model `{key}` url `{raw}`: {e}"))
        })
    }

    /// Where the file for `key` lives (or will live once downloaded).
    pub fn model_path(&self, key: &str) -> BackendResult<PathBuf> {
        let url = self.primary_url(key)?;
        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                BackendError::config(
                    "model_catalog",
                    format!("URL `{url}` has no filename component"),
                )
            })?;
        Ok(self.models_dir.join(file_name))
    }

    /// Returns [`ModelAvailability::Ready`] if the file is on disk, otherwise
    /// starts a detached download (at most one per file) and returns
    /// [`ModelAvailability::Downloading`].
    pub fn ensure_downloaded(&self, key: &str) -> BackendResult<ModelAvailability> {
        let path = self.model_path(key)?;
        if path.is_file() {
            return Ok(ModelAvailability::Ready(path));
        }

        {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !in_flight.insert(path.clone()) {
                return Ok(ModelAvailability::Downloading(path));
            }
        }

        let url = self.primary_url(key)?;
        let dest = path.clone();
        let in_flight = self.in_flight.clone();
        crate::info!("Downloading {url} -> {}", dest.display());
        std::thread::spawn(move || {
            match download(url.as_str(), &dest) {
                Ok(()) => crate::info!("Download finished: {}", dest.display()),
                Err(e) => crate::error!("Download of {url} failed: {e}"),
            }
            in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&dest);
        });

        Ok(ModelAvailability::Downloading(path))
    }
}

/// Connect budget for model downloads; the body itself may take hours.
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Streams `url` into `<dest>.part`, then renames it into place so a
/// partial file is never mistaken for a finished one.
fn download(url: &str, dest: &Path) -> BackendResult<()> {
    let part = dest.with_extension("part");
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| BackendError::file_system("create models directory", parent, e))?;
    }

    let agent = ureq::Agent::new_with_config(
        ureq::Agent::config_builder()
            .timeout_connect(Some(DOWNLOAD_CONNECT_TIMEOUT))
            .build(),
    );
    let response = agent
        .get(url)
        .call()
        .map_err(|e| ClientError::from_ureq(e, DOWNLOAD_CONNECT_TIMEOUT))?;

    let mut reader = response.into_body().into_reader();
    let mut file = std::fs::File::create(&part)
        .map_err(|e| BackendError::file_system("create partial download", &part, e))?;
    std::io::copy(&mut reader, &mut file)
        .map_err(|e| BackendError::file_system("write partial download", &part, e))?;
    file.flush()
        .map_err(|e| BackendError::file_system("flush partial download", &part, e))?;
    drop(file);

    std::fs::rename(&part, dest)
        .map_err(|e| BackendError::file_system("move finished download", dest, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(dir: &Path) -> ModelCatalog {
        let mut entries = BTreeMap::new();
        entries.insert(
            "tiny".to_string(),
            CatalogEntry {
                urls: vec!["https://example.com/repo/resolve/main/tiny-Q4_K_M.gguf".into()],
            },
        );
        entries.insert("empty".to_string(), CatalogEntry { urls: vec![] });
        entries.insert(
            "dir".to_string(),
            CatalogEntry {
                urls: vec!["https://example.com/models/".into()],
            },
        );
        ModelCatalog::new(entries, dir)
    }

    #[test]
    fn model_path_uses_last_url_segment() {
        let td = tempfile::tempdir().unwrap();
        let path = catalog(td.path()).model_path("tiny").unwrap();
        assert_eq!(path, td.path().join("tiny-Q4_K_M.gguf"));
    }

    #[test]
    fn bad_keys_and_entries_are_config_errors() {
        let td = tempfile::tempdir().unwrap();
        let catalog = catalog(td.path());
        for key in ["missing", "empty", "dir"] {
            let err = catalog.model_path(key).unwrap_err();
            assert!(matches!(err, BackendError::Config { .. }), "{key}: {err:?}");
        }
    }

    #[test]
    fn load_reads_manifest() {
        let td = tempfile::tempdir().unwrap();
        let manifest = td.path().join("llm.json");
        std::fs::write(
            &manifest,
            r#"{"a": {"urls": ["https://x.test/a.gguf"]}, "b": {"urls": ["https://x.test/b.gguf", "https://mirror.test/b.gguf"]}}"#,
        )
        .unwrap();
        let catalog = ModelCatalog::load(&manifest, td.path()).unwrap();
        assert_eq!(catalog.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(catalog.model_path("b").unwrap(), td.path().join("b.gguf"));
    }

    #[test]
    fn load_if_present_handles_missing_and_broken_manifests() {
        let td = tempfile::tempdir().unwrap();
        let manifest = td.path().join("llm.json");
        assert!(
            ModelCatalog::load_if_present(&manifest, td.path())
                .unwrap()
                .is_none()
        );

        std::fs::write(&manifest, "{ not json").unwrap();
        let err = ModelCatalog::load_if_present(&manifest, td.path()).unwrap_err();
        assert!(matches!(err, BackendError::Config { field: "model_catalog", .. }));
    }

    #[test]
    fn ensure_downloaded_reports_ready_file() {
        let td = tempfile::tempdir().unwrap();
        let catalog = catalog(td.path());
        let path = td.path().join("tiny-Q4_K_M.gguf");
        std::fs::write(&path, b"GGUF").unwrap();
        assert_eq!(
            catalog.ensure_downloaded("tiny").unwrap(),
            ModelAvailability::Ready(path)
        );
    }

    #[test]
    fn ensure_downloaded_fetches_in_background() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/files/small.gguf")
            .with_status(200)
            .with_body("GGUF-bytes")
            .create();

        let td = tempfile::tempdir().unwrap();
        let mut entries = BTreeMap::new();
        entries.insert(
            "small".to_string(),
            CatalogEntry {
                urls: vec![format!("{}/files/small.gguf", server.url())],
            },
        );
        let catalog = ModelCatalog::new(entries, td.path().join("models"));
        let dest = td.path().join("models").join("small.gguf");

        assert_eq!(
            catalog.ensure_downloaded("small").unwrap(),
            ModelAvailability::Downloading(dest.clone())
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !dest.is_file() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "GGUF-bytes");
        assert!(!dest.with_extension("part").exists());
        assert_eq!(
            catalog.ensure_downloaded("small").unwrap(),
            ModelAvailability::Ready(dest)
        );
    }
}
