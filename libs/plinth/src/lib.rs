//! # Plinth — request-processing substrate
//!
//! Two building blocks with real state:
//!
//! - a **component registry** with a two-phase lifecycle: providers are
//!   initialized (possibly suspending) in manifest order during startup, then
//!   the registry is frozen into a read-only handle shared by every request;
//! - a **validation engine** running a layered pipeline per field
//!   (default-filling → coercion → type check → custom checks), aggregating
//!   errors into a field → message map or producing a normalized document.
//!
//! Around them: an axum injection layer resolving registered components into
//! handler arguments, three adapters that bind a schema to a request-data
//! source, and the pure aggregation-fragment builders consumed by custom
//! checks and handlers.

pub mod context;
pub mod inject;
pub mod problem;
pub mod query;
pub mod registry;
pub mod validation;

pub use context::{ConfigProvider, ProviderCtx, ProviderCtxBuilder};
pub use inject::{Component, Injected};
pub use problem::{
    bad_request, internal_error, not_found, validation_failed, Problem, ProblemResponse,
};
pub use registry::{
    ComponentRegistry, Provider, ProviderSet, RegistryBuilder, RegistryError, SharedComponent,
};
pub use validation::{
    adapters::{
        validate, validate_path, validate_request, Docs, NormalizedPath, Source, Validated,
        ValidationLayer,
    },
    checks::{CheckCtx, CustomCheck, DocumentExists, DOCUMENT_EXISTS},
    engine::{Engine, UnknownFields, ValidateOpts},
    schema::{FieldRule, Schema},
    Document, ErrorMap, ValidationError,
};
