// Configuration management module
// TOML settings for the provider, embedding client, chunker, store, pool and caches

pub mod settings;

pub use settings::{
    Config, ConfigError, EmbeddingConfig, ProviderConfig, ProviderKind, StoreBackend,
    StoreConfig,
};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}

/// Render the effective configuration as TOML
#[inline]
pub fn show_config(config: &Config) -> anyhow::Result<String> {
    let rendered = toml::to_string_pretty(config)?;
    Ok(format!(
        "# {}\n{}",
        config.config_file_path().display(),
        rendered
    ))
}
