//! Command-line arguments for the furrow service.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Furrow: semantic search over farm field-visit records and photos.
#[derive(Parser, Debug)]
#[command(name = "furrow", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for SQLite, media and models.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Text embedding provider (auto, openai, local).
    #[arg(long = "provider")]
    pub provider: Option<String>,

    /// Index stored visits missing from the text index, then exit.
    #[arg(long = "reconcile")]
    pub reconcile: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > FURROW_CONFIG env var > ./furrow.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.resolve_config_path_from(|k| std::env::var(k).ok())
    }

    fn resolve_config_path_from<F>(&self, lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = lookup("FURROW_CONFIG").filter(|v| !v.trim().is_empty()) {
            return PathBuf::from(p);
        }
        PathBuf::from("furrow.toml")
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > FURROW_PORT env var > config file value > 8000.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.resolve_port_from(config_port, |k| std::env::var(k).ok())
    }

    fn resolve_port_from<F>(&self, config_port: u16, lookup: F) -> u16
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = self.port {
            return p;
        }
        if let Some(p) = lookup("FURROW_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
            return p;
        }
        if config_port != 0 {
            return config_port;
        }
        8000
    }

    /// Data directory override, if given.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Log level override, if given.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }

    /// Provider override, normalised to lowercase.
    pub fn resolve_provider(&self) -> Option<String> {
        self.provider
            .as_deref()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
    }
}
