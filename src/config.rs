//! Process configuration, built once from the environment and CLI flags and
//! passed by reference into every component.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use cadplan_core::ExportFormat;

const DEFAULT_MODEL_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

/// How plans are turned into programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStrategy {
    /// Ask the language model, then validate its program statically.
    #[default]
    Model,
    /// Deterministic lowering with no external call.
    Direct,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible endpoint, or an Azure deployment URL.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    /// When set, requests use Azure conventions (`api-key` header, `api-version` query).
    pub api_version: Option<String>,
    pub timeout: Duration,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per model call for transport errors and timeouts.
    pub upstream_attempts: u32,
    /// Delay before the second attempt; doubles after each further failure.
    pub backoff: Duration,
    /// Re-prompts after a response is rejected by schema or grammar.
    pub repair_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            upstream_attempts: 3,
            backoff: Duration::from_millis(500),
            repair_attempts: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Voxel cells along the longest axis of a solid's bounds.
    pub resolution: usize,
    pub timeout: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            resolution: 96,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the artifact tree and registry database.
    pub data_dir: PathBuf,
    pub export_format: ExportFormat,
    pub compile_strategy: CompileStrategy,
    /// Keep a timestamped plan copy before every refine.
    pub snapshots: bool,
    pub model: ModelConfig,
    pub retry: RetryPolicy,
    pub kernel: KernelConfig,
}

impl Config {
    /// Defaults rooted at `data_dir`, without reading the environment.
    pub fn for_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            export_format: ExportFormat::Stl,
            compile_strategy: CompileStrategy::Model,
            snapshots: true,
            model: ModelConfig {
                endpoint: DEFAULT_MODEL_URL.to_string(),
                api_key: None,
                model: DEFAULT_MODEL.to_string(),
                api_version: None,
                timeout: Duration::from_secs(60),
                max_tokens: 4000,
            },
            retry: RetryPolicy::default(),
            kernel: KernelConfig::default(),
        }
    }

    /// Reads `CADPLAN_*` variables over the defaults.
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var("CADPLAN_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_data_dir()?,
        };
        let mut config = Self::for_data_dir(data_dir);

        if let Ok(url) = std::env::var("CADPLAN_MODEL_URL") {
            config.model.endpoint = url;
        }
        config.model.api_key = std::env::var("CADPLAN_API_KEY").ok();
        if let Ok(model) = std::env::var("CADPLAN_MODEL") {
            config.model.model = model;
        }
        config.model.api_version = std::env::var("CADPLAN_API_VERSION").ok();
        if let Some(secs) = env_parse::<u64>("CADPLAN_MODEL_TIMEOUT_SECS")? {
            config.model.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("CADPLAN_KERNEL_TIMEOUT_SECS")? {
            config.kernel.timeout = Duration::from_secs(secs);
        }
        if let Some(resolution) = env_parse::<usize>("CADPLAN_KERNEL_RESOLUTION")? {
            config.kernel.resolution = resolution.max(8);
        }
        if let Some(attempts) = env_parse::<u32>("CADPLAN_REPAIR_ATTEMPTS")? {
            config.retry.repair_attempts = attempts;
        }
        if let Ok(format) = std::env::var("CADPLAN_EXPORT_FORMAT") {
            config.export_format = format
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("CADPLAN_EXPORT_FORMAT")?;
        }
        Ok(config)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("cadplan.db")
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "cadplan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => Ok(Some(
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{} must be a number, got {:?}", name, raw))?,
        )),
        Err(_) => Ok(None),
    }
}
