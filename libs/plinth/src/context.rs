use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Provider of component-specific configuration (raw JSON sections only).
pub trait ConfigProvider: Send + Sync {
    /// Returns the raw JSON section for the component, if any.
    fn get_component_config(&self, component_name: &str) -> Option<&serde_json::Value>;
}

/// Ambient handles offered to provider initializers during startup.
///
/// An initializer receives `&ProviderCtx` and takes whichever handles it
/// needs: the service context (configuration, cancellation) or the event
/// loop (`tokio::runtime::Handle`). Nothing outside this set is ever
/// auto-supplied.
#[derive(Clone)]
pub struct ProviderCtx {
    config_provider: Option<Arc<dyn ConfigProvider>>,
    cancellation_token: CancellationToken,
    runtime: tokio::runtime::Handle,
}

pub struct ProviderCtxBuilder {
    inner: ProviderCtx,
}

impl ProviderCtxBuilder {
    /// Must be called from within a tokio runtime.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            inner: ProviderCtx {
                config_provider: None,
                cancellation_token: token,
                runtime: tokio::runtime::Handle::current(),
            },
        }
    }

    pub fn with_config_provider(mut self, p: Arc<dyn ConfigProvider>) -> Self {
        self.inner.config_provider = Some(p);
        self
    }

    pub fn build(self) -> ProviderCtx {
        self.inner
    }
}

impl ProviderCtx {
    // ---- public read-only API for initializers ----

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Handle to the event loop, for initializers that spawn background work.
    pub fn runtime(&self) -> &tokio::runtime::Handle {
        &self.runtime
    }

    /// Best-effort: deserialize the named component's config section into `T`,
    /// falling back to `T::default()` if the section is missing or invalid.
    pub fn component_config<T: serde::de::DeserializeOwned + Default>(&self, name: &str) -> T {
        match &self.config_provider {
            Some(p) => p
                .get_component_config(name)
                .and_then(|v| serde_json::from_value::<T>(v.clone()).ok())
                .unwrap_or_default(),
            None => T::default(),
        }
    }

    /// Strict: deserialize the named component's config section into `T`,
    /// returning a pathful error on failure.
    pub fn component_config_required<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
    ) -> anyhow::Result<T> {
        let prov = self
            .config_provider
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no ConfigProvider"))?;

        let val = prov
            .get_component_config(name)
            .ok_or_else(|| anyhow::anyhow!("missing component config: {name}"))?;

        let out: T = serde_json::from_value(val.clone())
            .map_err(|e| anyhow::anyhow!("invalid {name} config: {}", e))?;
        Ok(out)
    }
}
