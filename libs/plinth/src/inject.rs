//! Component injection into axum handlers.
//!
//! A handler parameter `Injected<T>` resolves `T` from, in order:
//!
//! 1. an `Arc<T>` placed directly in the request extensions (tests and
//!    special-cased routes override the registry this way);
//! 2. the frozen [`ComponentRegistry`] shared via `Arc` in the extensions,
//!    looked up under [`Component::NAME`].
//!
//! A miss is a wiring defect and rejects the request with a 500 problem.

use std::ops::Deref;
use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::problem::{internal_error, ProblemResponse};
use crate::registry::ComponentRegistry;

/// Gives a type (or trait object) its registry name for injection.
pub trait Component: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Extractor resolving a registered component into a handler argument.
pub struct Injected<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> Deref for Injected<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> Clone for Injected<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ?Sized> std::fmt::Debug for Injected<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injected")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T, S> FromRequestParts<S> for Injected<T>
where
    T: Component + ?Sized,
    S: Send + Sync,
{
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(direct) = parts.extensions.get::<Arc<T>>() {
            return Ok(Injected(direct.clone()));
        }

        let registry = parts
            .extensions
            .get::<Arc<ComponentRegistry>>()
            .ok_or_else(|| {
                tracing::error!(component = T::NAME, "no component registry on the request");
                internal_error("component registry is not configured")
            })?;

        registry.get::<T>(T::NAME).map(Injected).map_err(|e| {
            tracing::error!(component = T::NAME, error = %e, "component resolution failed");
            internal_error(format!("component '{}' is unavailable", T::NAME))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use axum::http::Request;

    struct Clock {
        now: i64,
    }

    impl Component for Clock {
        const NAME: &'static str = "clock";
    }

    fn parts_with(registry: Option<ComponentRegistry>) -> Parts {
        let mut req = Request::new(());
        if let Some(r) = registry {
            req.extensions_mut().insert(Arc::new(r));
        }
        req.into_parts().0
    }

    #[tokio::test]
    async fn resolves_from_the_registry_by_component_name() {
        let mut b = RegistryBuilder::new();
        b.register_instance(Clock::NAME, Arc::new(Clock { now: 7 }));
        let mut parts = parts_with(Some(b.freeze()));

        let injected = Injected::<Clock>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(injected.now, 7);
    }

    #[tokio::test]
    async fn direct_extension_wins_over_the_registry() {
        let mut b = RegistryBuilder::new();
        b.register_instance(Clock::NAME, Arc::new(Clock { now: 1 }));
        let mut parts = parts_with(Some(b.freeze()));
        parts.extensions.insert(Arc::new(Clock { now: 99 }));

        let injected = Injected::<Clock>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(injected.now, 99);
    }

    #[tokio::test]
    async fn missing_component_rejects_with_500() {
        let mut parts = parts_with(Some(RegistryBuilder::new().freeze()));

        let err = Injected::<Clock>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.0.status, 500);
    }

    #[tokio::test]
    async fn missing_registry_rejects_with_500() {
        let mut parts = parts_with(None);

        let err = Injected::<Clock>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.0.status, 500);
    }
}
