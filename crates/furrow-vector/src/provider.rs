//! Text embedding provider selection and fallback.
//!
//! The active provider is resolved once, at construction, from the
//! configured [`ProviderMode`] and whether a remote credential is present.
//! It does not change for the lifetime of the process.

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use furrow_core::config::EmbeddingConfig;
use furrow_core::error::FurrowError;
use furrow_core::types::{ActiveProvider, ProviderMode};

use crate::embedding::{DynEmbeddingService, EmbeddingService, OnnxEmbeddingService};
use crate::remote::{OpenAiEmbeddingService, RemoteEmbeddingConfig};

type Loader =
    Arc<dyn Fn() -> Result<Arc<dyn DynEmbeddingService>, FurrowError> + Send + Sync>;

// ---------------------------------------------------------------------------
// LazyLocalEmbedding - load on first use
// ---------------------------------------------------------------------------

/// An embedding service that is loaded on first use.
///
/// Concurrent first callers wait on the same load. A failed load leaves the
/// cell empty, so the next call tries again.
pub struct LazyLocalEmbedding {
    name: String,
    loader: Loader,
    cell: OnceCell<Arc<dyn DynEmbeddingService>>,
}

impl LazyLocalEmbedding {
    pub fn new<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn DynEmbeddingService>, FurrowError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            loader: Arc::new(loader),
            cell: OnceCell::new(),
        }
    }

    /// Local sentence-transformer from `model_dir` (`model.onnx` + `tokenizer.json`).
    pub fn onnx(name: impl Into<String>, model_dir: PathBuf) -> Self {
        Self::new(name, move || {
            let svc = OnnxEmbeddingService::from_directory(&model_dir)?;
            Ok(Arc::new(svc) as Arc<dyn DynEmbeddingService>)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Load the model if it is not loaded yet.
    pub async fn ensure_loaded(&self) -> Result<&Arc<dyn DynEmbeddingService>, FurrowError> {
        self.cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let svc = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| {
                        FurrowError::ProviderUnavailable(format!("model load task failed: {}", e))
                    })?;
                match &svc {
                    Ok(_) => info!(model = %self.name, "Local embedding model ready"),
                    Err(e) => warn!(model = %self.name, error = %e, "Local embedding model unavailable"),
                }
                svc
            })
            .await
    }
}

impl std::fmt::Debug for LazyLocalEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyLocalEmbedding")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl EmbeddingService for LazyLocalEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, FurrowError> {
        let svc = self.ensure_loaded().await?;
        svc.embed_boxed(text).await
    }

    fn dimensions(&self) -> usize {
        self.cell.get().map(|s| s.dimensions()).unwrap_or(384)
    }
}

// ---------------------------------------------------------------------------
// EmbeddingProvider
// ---------------------------------------------------------------------------

/// Provider state as reported by health checks.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider_config: ProviderMode,
    pub provider_active: ActiveProvider,
    pub available: bool,
    pub credential_set: bool,
}

/// Text embedding provider with remote/local selection and auto fallback.
pub struct EmbeddingProvider {
    configured: ProviderMode,
    active: ActiveProvider,
    api_key_env: String,
    remote: Option<Arc<dyn DynEmbeddingService>>,
    local: Arc<LazyLocalEmbedding>,
}

impl EmbeddingProvider {
    /// Assemble a provider. `remote` is `Some` exactly when a credential is configured.
    pub fn new(
        configured: ProviderMode,
        api_key_env: impl Into<String>,
        remote: Option<Arc<dyn DynEmbeddingService>>,
        local: Arc<LazyLocalEmbedding>,
    ) -> Self {
        let active = ActiveProvider::resolve(configured, remote.is_some());
        Self {
            configured,
            active,
            api_key_env: api_key_env.into(),
            remote,
            local,
        }
    }

    /// Build from configuration. The credential value comes from the caller
    /// (read from the variable named by `api_key_env`).
    pub fn from_config(
        config: &EmbeddingConfig,
        local_model_dir: PathBuf,
        api_key: Option<SecretString>,
    ) -> Result<Self, FurrowError> {
        let remote = match api_key {
            Some(key) => {
                let svc = OpenAiEmbeddingService::new(RemoteEmbeddingConfig::from_config(config, key))?;
                Some(Arc::new(svc) as Arc<dyn DynEmbeddingService>)
            }
            None => None,
        };
        let local = Arc::new(LazyLocalEmbedding::onnx(
            config.local_model_name.clone(),
            local_model_dir,
        ));
        Ok(Self::new(config.mode(), config.api_key_env.clone(), remote, local))
    }

    pub fn configured(&self) -> ProviderMode {
        self.configured
    }

    pub fn active(&self) -> ActiveProvider {
        self.active
    }

    pub fn credential_set(&self) -> bool {
        self.remote.is_some()
    }

    /// Embed `text` with the active provider.
    ///
    /// Blank text returns `EmptyInput` without calling any provider. Under
    /// `auto`, a remote failure is retried once on the local model.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, FurrowError> {
        if text.trim().is_empty() {
            return Err(FurrowError::EmptyInput);
        }

        match self.active {
            ActiveProvider::Local => self.local.embed(text).await,
            ActiveProvider::Remote => {
                let Some(remote) = &self.remote else {
                    return Err(FurrowError::MissingCredential {
                        mode: self.configured.to_string(),
                        variable: self.api_key_env.clone(),
                    });
                };
                match remote.embed_boxed(text).await {
                    Ok(v) => Ok(v),
                    Err(e) if self.configured == ProviderMode::Auto => {
                        warn!(error = %e, "Remote embedding failed, falling back to local model");
                        self.local.embed(text).await
                    }
                    Err(FurrowError::ProviderUnavailable(msg)) => {
                        Err(FurrowError::ProviderUnavailable(msg))
                    }
                    Err(e) => Err(FurrowError::ProviderUnavailable(e.to_string())),
                }
            }
        }
    }

    /// Whether the active provider can currently produce embeddings.
    ///
    /// Remote counts as available when its credential is set; local is
    /// available once its model loads (this may trigger the load).
    pub async fn is_available(&self) -> bool {
        match self.active {
            ActiveProvider::Remote => self.remote.is_some(),
            ActiveProvider::Local => self.local.ensure_loaded().await.is_ok(),
        }
    }

    pub async fn status(&self) -> ProviderStatus {
        ProviderStatus {
            provider_config: self.configured,
            provider_active: self.active,
            available: self.is_available().await,
            credential_set: self.credential_set(),
        }
    }
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("configured", &self.configured)
            .field("active", &self.active)
            .field("credential_set", &self.credential_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Remote stand-in that always fails and counts calls.
    struct FailingRemote {
        calls: AtomicUsize,
    }

    impl EmbeddingService for FailingRemote {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, FurrowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FurrowError::ProviderUnavailable("HTTP 500".into()))
        }

        fn dimensions(&self) -> usize {
            1536
        }
    }

    fn mock_local() -> Arc<LazyLocalEmbedding> {
        Arc::new(LazyLocalEmbedding::new("mock-local", || {
            Ok(Arc::new(MockEmbedding::new()) as Arc<dyn DynEmbeddingService>)
        }))
    }

    fn broken_local() -> Arc<LazyLocalEmbedding> {
        Arc::new(LazyLocalEmbedding::new("broken-local", || {
            Err(FurrowError::ProviderUnavailable("model.onnx missing".into()))
        }))
    }

    fn mock_remote() -> Arc<dyn DynEmbeddingService> {
        Arc::new(MockEmbedding::with_dimensions(1536))
    }

    #[test]
    fn test_auto_without_credential_resolves_local() {
        let p = EmbeddingProvider::new(ProviderMode::Auto, "OPENAI_API_KEY", None, mock_local());
        assert_eq!(p.active(), ActiveProvider::Local);
        assert!(!p.credential_set());
    }

    #[test]
    fn test_auto_with_credential_resolves_remote() {
        let p = EmbeddingProvider::new(
            ProviderMode::Auto,
            "OPENAI_API_KEY",
            Some(mock_remote()),
            mock_local(),
        );
        assert_eq!(p.active(), ActiveProvider::Remote);
    }

    #[test]
    fn test_local_mode_ignores_credential() {
        let p = EmbeddingProvider::new(
            ProviderMode::Local,
            "OPENAI_API_KEY",
            Some(mock_remote()),
            mock_local(),
        );
        assert_eq!(p.active(), ActiveProvider::Local);
        assert!(p.credential_set());
    }

    #[tokio::test]
    async fn test_remote_used_when_active() {
        let p = EmbeddingProvider::new(
            ProviderMode::Auto,
            "OPENAI_API_KEY",
            Some(mock_remote()),
            mock_local(),
        );
        assert_eq!(p.embed("corn rootworm").await.unwrap().len(), 1536);
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_local_on_remote_failure() {
        let remote = Arc::new(FailingRemote {
            calls: AtomicUsize::new(0),
        });
        let p = EmbeddingProvider::new(
            ProviderMode::Auto,
            "OPENAI_API_KEY",
            Some(remote.clone() as Arc<dyn DynEmbeddingService>),
            mock_local(),
        );

        let v = p.embed("soybean aphids").await.unwrap();
        assert_eq!(v.len(), 384);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_only_failure_does_not_fall_back() {
        let remote = Arc::new(FailingRemote {
            calls: AtomicUsize::new(0),
        });
        let local = mock_local();
        let p = EmbeddingProvider::new(
            ProviderMode::Remote,
            "OPENAI_API_KEY",
            Some(remote as Arc<dyn DynEmbeddingService>),
            local.clone(),
        );

        assert!(matches!(
            p.embed("soybean aphids").await,
            Err(FurrowError::ProviderUnavailable(_))
        ));
        assert!(!local.is_loaded());
    }

    #[tokio::test]
    async fn test_remote_only_without_credential_is_missing_credential() {
        let p = EmbeddingProvider::new(ProviderMode::Remote, "OPENAI_API_KEY", None, mock_local());
        assert_eq!(p.active(), ActiveProvider::Remote);

        match p.embed("hello").await {
            Err(FurrowError::MissingCredential { mode, variable }) => {
                assert_eq!(mode, "openai");
                assert_eq!(variable, "OPENAI_API_KEY");
            }
            other => panic!("unexpected: {:?}", other.map(|v| v.len())),
        }
        assert!(!p.is_available().await);
    }

    #[tokio::test]
    async fn test_blank_text_calls_no_provider() {
        let remote = Arc::new(FailingRemote {
            calls: AtomicUsize::new(0),
        });
        let local = mock_local();
        let p = EmbeddingProvider::new(
            ProviderMode::Auto,
            "OPENAI_API_KEY",
            Some(remote.clone() as Arc<dyn DynEmbeddingService>),
            local.clone(),
        );

        assert!(matches!(p.embed("  \t").await, Err(FurrowError::EmptyInput)));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
        assert!(!local.is_loaded());
    }

    #[tokio::test]
    async fn test_local_load_failure_is_unavailable() {
        let p = EmbeddingProvider::new(ProviderMode::Local, "OPENAI_API_KEY", None, broken_local());
        assert!(matches!(
            p.embed("hello").await,
            Err(FurrowError::ProviderUnavailable(_))
        ));
        let status = p.status().await;
        assert!(!status.available);
        assert_eq!(status.provider_active, ActiveProvider::Local);
    }

    #[tokio::test]
    async fn test_lazy_load_happens_once_under_concurrency() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let lazy = Arc::new(LazyLocalEmbedding::new("counted", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Arc::new(MockEmbedding::new()) as Arc<dyn DynEmbeddingService>)
        }));

        let mut handles = Vec::new();
        for i in 0..8 {
            let lazy = lazy.clone();
            handles.push(tokio::spawn(async move {
                lazy.embed(&format!("query {}", i)).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(lazy.is_loaded());
    }

    #[tokio::test]
    async fn test_lazy_load_failure_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let lazy = LazyLocalEmbedding::new("flaky", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FurrowError::ProviderUnavailable("first load fails".into()))
            } else {
                Ok(Arc::new(MockEmbedding::new()) as Arc<dyn DynEmbeddingService>)
            }
        });

        assert!(lazy.embed("x").await.is_err());
        assert!(!lazy.is_loaded());
        assert!(lazy.embed("x").await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_from_config_without_key() {
        let cfg = EmbeddingConfig::default();
        let p = EmbeddingProvider::from_config(&cfg, PathBuf::from("/nonexistent/model"), None)
            .unwrap();
        assert_eq!(p.configured(), ProviderMode::Auto);
        assert_eq!(p.active(), ActiveProvider::Local);
        assert!(!p.is_available().await);
    }
}
