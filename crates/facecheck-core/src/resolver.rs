//! Image reference normalisation.
//!
//! Remote `http(s)` images are downloaded into a local cache keyed by the
//! SHA-256 of the URL; local paths gain a `file://` prefix. Resolution never
//! fails: on a download error the original reference is handed to the
//! detector unchanged, and the detector call fails on its own.

use crate::detector::FILE_SCHEME;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest URL extension carried over to the cached file name.
const MAX_EXTENSION_LEN: usize = 5;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("download failed: {0}")]
    Http(String),
    #[error("cache write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("download task failed: {0}")]
    TaskFailed(String),
}

/// Turns caller-supplied image references into detector-ready references.
#[derive(Debug, Clone)]
pub struct ImageResolver {
    cache_dir: PathBuf,
    timeout: Duration,
}

impl ImageResolver {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Overall timeout for a single remote download.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Normalise `reference`. Never fails; see the module docs.
    pub async fn resolve(&self, reference: &str) -> String {
        if is_remote(reference) {
            return match self.fetch(reference).await {
                Ok(path) => format!("{FILE_SCHEME}{}", path.display()),
                Err(e) => {
                    tracing::warn!(
                        url = reference,
                        error = %e,
                        "remote image fetch failed; passing reference through"
                    );
                    reference.to_string()
                }
            };
        }

        if reference.starts_with(FILE_SCHEME) {
            reference.to_string()
        } else {
            format!("{FILE_SCHEME}{reference}")
        }
    }

    /// Cache location for a remote URL.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let key = format!("{:x}", Sha256::digest(url.as_bytes()));
        let name = match url_extension(url) {
            Some(ext) => format!("{key}.{ext}"),
            None => key,
        };
        self.cache_dir.join(name)
    }

    async fn fetch(&self, url: &str) -> Result<PathBuf, ResolveError> {
        let dest = self.cache_path(url);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tracing::debug!(url, path = %dest.display(), "remote image cache hit");
            return Ok(dest);
        }

        let owned_url = url.to_string();
        let target = dest.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || download(&owned_url, &target, timeout))
            .await
            .map_err(|e| ResolveError::TaskFailed(e.to_string()))??;

        tracing::info!(url, path = %dest.display(), "remote image cached");
        Ok(dest)
    }
}

fn is_remote(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Extension of the last path segment, ignoring query and fragment.
fn url_extension(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let (_, after_scheme) = without_query.split_once("://")?;
    let (_, path) = after_scheme.split_once('/')?;
    let segment = path.rsplit('/').next()?;
    let ext = Path::new(segment).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Blocking download into `dest`.
///
/// Each call streams into its own temp file in the cache directory, so
/// concurrent downloads of one URL never share a partial file and a failed
/// transfer leaves nothing behind.
fn download(url: &str, dest: &Path, timeout: Duration) -> Result<(), ResolveError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let agent = ureq::AgentBuilder::new().timeout(timeout).build();
    let response = agent
        .get(url)
        .call()
        .map_err(|e| ResolveError::Http(e.to_string()))?;

    let mut partial = tempfile::NamedTempFile::new_in(dir)?;
    std::io::copy(&mut response.into_reader(), partial.as_file_mut())?;

    if let Err(e) = partial.persist(dest) {
        // Another download of the same URL finished first.
        if !dest.exists() {
            return Err(ResolveError::Io(e.error));
        }
    }
    Ok(())
}
