//! Configuration Loading
//!
//! File-backed configuration for the runner. Any format the `config` crate
//! understands is accepted (YAML, TOML, JSON, INI, RON, JSON5); the format is
//! picked from the file extension.
//!
//! ## Features
//!
//! - `${VAR}` and `$VAR` environment substitution before parsing
//! - Layering of several sources, later ones winning
//! - `NODERUN_`-prefixed environment overrides (`__` separates nesting levels)

mod runner;

pub use runner::{LogFormat, LoggingConfig, NodeDefaults, NodeOverrides, NodeProfile, RunnerConfig};

use config::{Config as Cfg, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::LazyLock;

/// Prefix of environment variables that override file values.
pub const ENV_PREFIX: &str = "NODERUN";

/// Configuration error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The values parsed but describe a configuration the runner cannot honour.
    #[error("{0}")]
    Invalid(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detect configuration format from file extension
///
/// ```rust,ignore
/// use noderun_kernel::config::detect_format;
///
/// assert_eq!(detect_format("runner.yml")?, FileFormat::Yaml);
/// ```
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat(format!("no file extension in '{path}'")))?;

    match ext.to_ascii_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*)\b)")
        .expect("environment reference pattern is a valid regex")
});

/// Replace `${VAR}` and `$VAR` references with environment values.
///
/// Unset variables are left verbatim. Substitution is single-pass, so a
/// value containing `$` is never expanded again.
pub fn substitute_env_vars(content: &str) -> String {
    ENV_REFERENCE
        .replace_all(content, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn read_source(path: &str) -> ConfigResult<File<config::FileSourceString, FileFormat>> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    Ok(File::from_str(&substitute_env_vars(&content), format))
}

fn finish<T: DeserializeOwned>(builder: ConfigBuilder<DefaultState>) -> ConfigResult<T> {
    builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load a configuration file, substituting environment references first.
pub fn load_config<T: DeserializeOwned>(path: &str) -> ConfigResult<T> {
    finish(Cfg::builder().add_source(read_source(path)?))
}

/// Parse configuration text in an explicit format.
///
/// ```rust,ignore
/// let defaults: NodeDefaults = from_str("timeout_ms = 500", FileFormat::Toml)?;
/// ```
pub fn from_str<T: DeserializeOwned>(content: &str, format: FileFormat) -> ConfigResult<T> {
    finish(Cfg::builder().add_source(File::from_str(&substitute_env_vars(content), format)))
}

/// Layer several in-memory sources; later sources override earlier ones.
pub fn merge_configs<T: DeserializeOwned>(sources: &[(&str, FileFormat)]) -> ConfigResult<T> {
    let builder = sources
        .iter()
        .fold(Cfg::builder(), |builder, (content, format)| {
            builder.add_source(File::from_str(&substitute_env_vars(content), *format))
        });
    finish(builder)
}

/// Layer several files; later files override earlier ones.
pub fn load_merged<T: DeserializeOwned>(paths: &[&str]) -> ConfigResult<T> {
    let mut builder = Cfg::builder();
    for path in paths {
        builder = builder.add_source(read_source(path)?);
    }
    finish(builder)
}

/// Load a file and apply `<prefix>_`-prefixed environment overrides.
///
/// Nesting uses a double underscore, so `NODERUN_DEFAULTS__TIMEOUT_MS=500`
/// overrides `defaults.timeout_ms`.
pub fn load_with_env<T: DeserializeOwned>(path: &str, env_prefix: &str) -> ConfigResult<T> {
    let builder = Cfg::builder().add_source(read_source(path)?).add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    finish(builder)
}
