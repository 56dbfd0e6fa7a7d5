//! Runtime configuration from environment variables or TOML.
//!
//! Every value has a default; invalid environment values fall back to it
//! without failing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GG_EDGE_N_CTX` | 2048 | Context window when a caller passes 0 |
//! | `GG_EDGE_N_THREADS` | 0 | Decode threads (0 = auto) |
//! | `GG_EDGE_USE_GPU` | false | Default GPU preference |
//! | `GG_EDGE_GPU_LAYERS` | -1 | Default offload layers (-1 = all) |
//! | `GG_EDGE_MAX_TOKENS` | 256 | Default generation limit |
//! | `GG_EDGE_TEMPERATURE` | 0.7 | Default sampling temperature |
//! | `GG_EDGE_TOP_P` | 0.9 | Default nucleus threshold |
//! | `GG_EDGE_TOP_K` | 40 | Default top-k limit |
//! | `GG_EDGE_LOG_LEVEL` | info | `tracing` filter directive |
//! | `GG_EDGE_LOG_FORMAT` | json | `json` or `pretty` |
//! | `GG_EDGE_LOG_FILE` | (stderr) | Log file path |

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::engine::{GenerationParams, GpuRequest};
use crate::telemetry::{LogConfig, LogFormat};

/// Smallest context window accepted from configuration.
const MIN_N_CTX: u32 = 128;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Defaults applied to session creation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub n_ctx: u32,
    pub n_threads: i32,
    pub use_gpu: bool,
    pub gpu_layers: i32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self { n_ctx: 2048, n_threads: 0, use_gpu: false, gpu_layers: -1 }
    }
}

impl SessionDefaults {
    pub fn gpu_request(&self) -> GpuRequest {
        GpuRequest { enabled: self.use_gpu, layers: self.gpu_layers }
    }
}

/// Defaults for [`crate::Runtime::try_generate_default`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub max_tokens: i32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        let params = GenerationParams::default();
        Self {
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
        }
    }
}

impl GenerationDefaults {
    pub fn params(&self) -> GenerationParams {
        GenerationParams::new(self.max_tokens, self.temperature, self.top_p, self.top_k)
    }
}

/// All GG-EDGE configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub session: SessionDefaults,
    pub generation: GenerationDefaults,
    pub logging: LogConfig,
}

impl EdgeConfig {
    /// Parse a TOML document. Missing tables and keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        Ok(config.sanitized())
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    fn sanitized(mut self) -> Self {
        self.session.n_ctx = self.session.n_ctx.max(MIN_N_CTX);
        self.session.n_threads = self.session.n_threads.max(0);
        self.generation.temperature = self.generation.temperature.max(0.0);
        self
    }

    /// Summary of the effective values, for logging at startup.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            n_ctx: self.session.n_ctx,
            n_threads: crate::models::resolve_threads(self.session.n_threads),
            use_gpu: self.session.use_gpu,
            gpu_layers: self.session.gpu_layers,
            max_tokens: self.generation.max_tokens,
            temperature: self.generation.temperature,
            top_p: self.generation.top_p,
            top_k: self.generation.top_k,
            log_level: self.logging.level.clone(),
        }
    }
}

/// Effective configuration summary.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub n_ctx: u32,
    pub n_threads: i32,
    pub use_gpu: bool,
    pub gpu_layers: i32,
    pub max_tokens: i32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub log_level: String,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn load_session_defaults() -> SessionDefaults {
    let defaults = SessionDefaults::default();
    SessionDefaults {
        n_ctx: parse_env("GG_EDGE_N_CTX", defaults.n_ctx),
        n_threads: parse_env("GG_EDGE_N_THREADS", defaults.n_threads),
        use_gpu: parse_bool("GG_EDGE_USE_GPU", defaults.use_gpu),
        gpu_layers: parse_env("GG_EDGE_GPU_LAYERS", defaults.gpu_layers),
    }
}

fn load_generation_defaults() -> GenerationDefaults {
    let defaults = GenerationDefaults::default();
    GenerationDefaults {
        max_tokens: parse_env("GG_EDGE_MAX_TOKENS", defaults.max_tokens),
        temperature: parse_env("GG_EDGE_TEMPERATURE", defaults.temperature),
        top_p: parse_env("GG_EDGE_TOP_P", defaults.top_p),
        top_k: parse_env("GG_EDGE_TOP_K", defaults.top_k),
    }
}

fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    LogConfig {
        format: std::env::var("GG_EDGE_LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse::<LogFormat>().ok())
            .unwrap_or(defaults.format),
        level: std::env::var("GG_EDGE_LOG_LEVEL").unwrap_or(defaults.level),
        output_path: std::env::var_os("GG_EDGE_LOG_FILE").map(PathBuf::from),
    }
}

/// Load all configuration from environment variables.
pub fn load() -> EdgeConfig {
    EdgeConfig {
        session: load_session_defaults(),
        generation: load_generation_defaults(),
        logging: load_log_config(),
    }
    .sanitized()
}
