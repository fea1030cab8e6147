//! Furrow: retrieval service for field-visit records and photos.
//!
//! Entry point that wires configuration, storage, embedding providers and
//! the HTTP API together.

mod cli;

use clap::Parser;
use secrecy::SecretString;

use furrow_api::{start_server, AppState};
use furrow_core::{redact_secret, FurrowConfig, ProviderMode};
use furrow_vector::RetrievalEngine;

use cli::CliArgs;

/// Apply CLI overrides on top of the file and environment configuration.
fn apply_cli_overrides(config: &mut FurrowConfig, args: &CliArgs) {
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    if let Some(provider) = args.resolve_provider() {
        config.embedding.provider = provider;
    }
    config.general.port = args.resolve_port(config.general.port);
}

/// Read the credential from the variable named by `api_key_env`.
/// Blank values count as unset.
fn read_api_key(config: &FurrowConfig) -> Option<String> {
    std::env::var(&config.embedding.api_key_env)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config. Loaded before tracing so the file can set the log level.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match FurrowConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (FurrowConfig::default(), Some(e)),
    };
    config.apply_env_overrides();
    apply_cli_overrides(&mut config, &args);

    init_tracing(&config.general.log_level);
    tracing::info!("Starting Furrow v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) if config_file.exists() => {
            tracing::warn!(path = %config_file.display(), error = %e, "Invalid configuration, using defaults")
        }
        Some(_) => tracing::info!(path = %config_file.display(), "No configuration file, using defaults"),
    }

    // Startup diagnostics.
    let api_key = read_api_key(&config);
    let mode = config.embedding.mode();
    tracing::info!(
        provider_config = %mode,
        api_key_env = %config.embedding.api_key_env,
        api_key = %redact_secret(api_key.as_deref()),
        "Embedding provider configuration"
    );
    if mode == ProviderMode::Remote && api_key.is_none() {
        tracing::warn!(
            variable = %config.embedding.api_key_env,
            "Provider is 'openai' but no API key is set; text embedding will fail"
        );
    }

    let data_dir = config.data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    tracing::info!(
        data_dir = %data_dir.display(),
        db = %config.db_path().display(),
        media = %config.media_dir().display(),
        "Data paths"
    );

    let engine = RetrievalEngine::from_config(&config, api_key.map(SecretString::from))?;
    tracing::info!(
        provider_active = %engine.provider().active(),
        text_entries = engine.text_index().count(),
        image_entries = engine.image_index().count(),
        clip_enabled = config.clip.enabled,
        "Retrieval engine ready"
    );

    if args.reconcile {
        let report = engine.reconcile().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if config.search.reconcile_on_startup {
        let report = engine.reconcile().await?;
        tracing::info!(
            examined = report.examined,
            indexed = report.indexed,
            pending = report.pending,
            "Startup reconciliation finished"
        );
    }

    let state = AppState::new(config.clone(), engine);
    start_server(&config, state).await?;

    Ok(())
}
