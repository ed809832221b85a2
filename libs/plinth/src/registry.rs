//! Two-phase component registry.
//!
//! Startup phase: a [`RegistryBuilder`] walks provider manifests in declared
//! order, awaiting each initializer to completion before the next one starts.
//! Serving phase: [`RegistryBuilder::freeze`] produces an immutable
//! [`ComponentRegistry`] that any number of request tasks may read without
//! locking.
//!
//! Components are stored as `Arc<T>` behind `Box<dyn Any>` and downcast on
//! read, so `T` may be a trait object (`dyn DocumentExists`). Re-registering
//! a name silently overwrites the previous value; the last write is what
//! `get` observes.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::context::ProviderCtx;

/// A component as stored: `Arc<T>` erased behind `Any`.
pub type SharedComponent = Box<dyn Any + Send + Sync>;

type InitFn =
    Box<dyn Fn(ProviderCtx) -> BoxFuture<'static, anyhow::Result<SharedComponent>> + Send + Sync>;

/// A named provider declaration: the (name, initializer) pair that produces a
/// component. Initialization is always a task; synchronous work is a task
/// that completes immediately.
pub struct Provider {
    name: &'static str,
    init: InitFn,
}

impl Provider {
    /// Provider whose initializer resolves to a concrete value.
    pub fn new<F, Fut, T>(name: &'static str, init: F) -> Self
    where
        F: Fn(ProviderCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + Sync + 'static,
    {
        Self {
            name,
            init: Box::new(move |ctx| {
                let fut = init(ctx);
                Box::pin(async move {
                    let value = fut.await?;
                    Ok(Box::new(Arc::new(value)) as SharedComponent)
                })
            }),
        }
    }

    /// Provider whose initializer resolves to an `Arc`, typically an
    /// `Arc<dyn Trait>` (e.g. the `document_exists` checker).
    pub fn new_arc<F, Fut, T>(name: &'static str, init: F) -> Self
    where
        F: Fn(ProviderCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Arc<T>>> + Send + 'static,
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            name,
            init: Box::new(move |ctx| {
                let fut = init(ctx);
                Box::pin(async move {
                    let value = fut.await?;
                    Ok(Box::new(value) as SharedComponent)
                })
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name).finish()
    }
}

/// An explicit, ordered manifest of providers. Replaces runtime discovery:
/// registration order is exactly the declared order.
pub struct ProviderSet {
    name: &'static str,
    providers: Vec<Provider>,
}

impl ProviderSet {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            providers: Vec::new(),
        }
    }

    pub fn with(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn push(&mut self, provider: Provider) {
        self.providers.push(provider);
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }
}

/// Structured errors for the component registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `get` on an unregistered name. A programming error surfaced
    /// immediately; never retried.
    #[error("component '{0}' is not registered")]
    ComponentMissing(String),

    /// The stored component is not of the requested type.
    #[error("component '{name}' has unexpected type")]
    TypeMismatch { name: String },

    /// A provider initializer failed; aborts the whole startup sequence.
    #[error("initialization failed for provider '{provider}'")]
    Init {
        provider: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Mutable registry handle for the startup phase.
#[derive(Default)]
pub struct RegistryBuilder {
    components: HashMap<String, SharedComponent>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every provider of the set, in declared order. Each
    /// initializer is awaited to completion before the next begins; the
    /// first failure aborts the whole sequence (startup failure is fatal,
    /// not retried, not partially rolled back).
    pub async fn register_set(
        &mut self,
        ctx: &ProviderCtx,
        set: &ProviderSet,
    ) -> Result<(), RegistryError> {
        tracing::debug!(set = set.name, "registering provider set");
        for provider in set.providers() {
            self.register(ctx, provider).await?;
        }
        Ok(())
    }

    /// Invoke a provider's initializer with the ambient context and store the
    /// result under the provider's name.
    pub async fn register(
        &mut self,
        ctx: &ProviderCtx,
        provider: &Provider,
    ) -> Result<(), RegistryError> {
        tracing::debug!(component = provider.name, "registering component");
        let instance = (provider.init)(ctx.clone())
            .await
            .map_err(|source| RegistryError::Init {
                provider: provider.name,
                source,
            })?;
        self.insert(provider.name.to_string(), instance);
        Ok(())
    }

    /// Direct registration bypassing initializer invocation.
    pub fn register_instance<T>(&mut self, name: impl Into<String>, instance: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(name.into(), Box::new(instance));
    }

    fn insert(&mut self, name: String, instance: SharedComponent) {
        if self.components.contains_key(&name) {
            // Last write wins; kept observable rather than promoted to an error.
            tracing::debug!(component = %name, "overwriting existing registration");
        }
        self.components.insert(name, instance);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// End the startup phase. The returned handle is read-only.
    pub fn freeze(self) -> ComponentRegistry {
        tracing::debug!(
            components = self.components.len(),
            "freezing component registry"
        );
        ComponentRegistry {
            components: self.components,
        }
    }
}

/// Read-only registry handle for the serving phase. Shared via `Arc`;
/// concurrent reads need no locking.
pub struct ComponentRegistry {
    components: HashMap<String, SharedComponent>,
}

impl ComponentRegistry {
    /// Resolve a component by name, downcasting the stored `Arc<T>`.
    /// [`RegistryError::ComponentMissing`] is the only expected error path;
    /// a type mismatch means the call site and the provider disagree.
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let boxed = self
            .components
            .get(name)
            .ok_or_else(|| RegistryError::ComponentMissing(name.to_string()))?;

        boxed
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or_else(|| RegistryError::TypeMismatch {
                name: name.to_string(),
            })
    }

    /// Membership test; never fails.
    pub fn exists(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.components.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ComponentRegistry")
            .field("components", &names)
            .finish()
    }
}
