use anyhow::{Context, Result};
use facecheck_core::{ComparatorConfig, ImageResolver};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Optional settings read from `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    similarity_threshold: Option<f64>,
    min_face_size: Option<f64>,
    cache_dir: Option<PathBuf>,
    default_reference: Option<String>,
    fetch_timeout_secs: Option<u64>,
}

/// CLI configuration: `FACECHECK_*` environment variables override the TOML
/// file, which overrides the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f64,
    /// Minimum face size relative to the image.
    pub min_face_size: f64,
    /// Where downloaded reference images are cached.
    pub cache_dir: PathBuf,
    /// Reference image used when `compare` is given only the captured image.
    pub default_reference: Option<String>,
    /// Timeout in seconds for one remote image download.
    pub fetch_timeout_secs: u64,
}

impl Config {
    /// Load from `path`, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();

        let file = match path {
            Some(p) => read_file(p)?,
            None => {
                let default = config_home(&env).join("facecheck/config.toml");
                if default.exists() {
                    read_file(&default)?
                } else {
                    FileConfig::default()
                }
            }
        };

        Self::from_sources(file, env)
    }

    fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cache_dir = env("FACECHECK_CACHE_DIR")
            .map(PathBuf::from)
            .or(file.cache_dir)
            .unwrap_or_else(|| cache_home(&env).join("facecheck/images"));

        let defaults = ComparatorConfig::default();
        let config = Self {
            similarity_threshold: env_parse(&env, "FACECHECK_SIMILARITY_THRESHOLD")
                .or(file.similarity_threshold)
                .unwrap_or(defaults.similarity_threshold),
            min_face_size: env_parse(&env, "FACECHECK_MIN_FACE_SIZE")
                .or(file.min_face_size)
                .unwrap_or(defaults.min_face_size),
            cache_dir,
            default_reference: env("FACECHECK_DEFAULT_REFERENCE").or(file.default_reference),
            fetch_timeout_secs: env_parse(&env, "FACECHECK_FETCH_TIMEOUT_SECS")
                .or(file.fetch_timeout_secs)
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        };
        config
            .comparator_config()
            .validate()
            .context("invalid facecheck configuration")?;
        Ok(config)
    }

    pub fn comparator_config(&self) -> ComparatorConfig {
        ComparatorConfig {
            similarity_threshold: self.similarity_threshold,
            min_face_size: self.min_face_size,
        }
    }

    pub fn resolver(&self) -> ImageResolver {
        ImageResolver::new(&self.cache_dir)
            .with_timeout(Duration::from_secs(self.fetch_timeout_secs))
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

/// Unparseable values fall back as if unset.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

fn home(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    PathBuf::from(env("HOME").unwrap_or_else(|| "/tmp".to_string()))
}

fn cache_home(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home(env).join(".cache"))
}

fn config_home(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home(env).join(".config"))
}
