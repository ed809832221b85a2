//! Builtin custom checks.
//!
//! Checks run after type checking, in declared order; each may append a
//! field error without stopping its siblings. The allowed-path check is the
//! one exception: it aborts the whole request with a not-found outcome.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Document, ErrorMap, ValidationError};
use crate::registry::ComponentRegistry;

/// Registry name of the existence-check collaborator.
pub const DOCUMENT_EXISTS: &str = "document_exists";

/// Contract consumed by the existence check: asks an external collaborator
/// whether a referenced identifier exists in a collection. May suspend.
#[async_trait]
pub trait DocumentExists: Send + Sync {
    async fn exists(&self, collection: &str, value: &Value) -> anyhow::Result<bool>;
}

impl crate::inject::Component for dyn DocumentExists {
    const NAME: &'static str = DOCUMENT_EXISTS;
}

/// Ambient state offered to checks: the frozen registry and the request path.
#[derive(Clone, Copy, Default)]
pub struct CheckCtx<'a> {
    pub registry: Option<&'a ComponentRegistry>,
    pub request_path: Option<&'a str>,
}

/// A named validation rule beyond basic type checking, able to consult
/// external state. Registered on the engine under a name and referenced from
/// field rules by that name.
#[async_trait]
pub trait CustomCheck: Send + Sync {
    async fn run(
        &self,
        ctx: CheckCtx<'_>,
        field: &str,
        value: &Value,
        config: &Value,
        document: &Document,
        errors: &mut ErrorMap,
    ) -> Result<(), ValidationError>;
}

fn config_error(check: &str, source: impl Into<anyhow::Error>) -> ValidationError {
    ValidationError::Check {
        check: check.to_string(),
        source: source.into(),
    }
}

/// Appends `message` for `field` unless an earlier rule already failed it.
fn append_error(errors: &mut ErrorMap, field: &str, message: impl Into<String>) {
    errors.entry(field.to_string()).or_insert_with(|| message.into());
}

// ---- existence check ----

#[derive(Debug, Deserialize)]
struct ExistenceConfig {
    name: String,
    #[serde(default)]
    lookup: bool,
    map: HashMap<String, CollectionMeta>,
}

#[derive(Debug, Deserialize)]
struct CollectionMeta {
    name: String,
    not_found: String,
}

/// Tests the existence of a referenced identifier against a collection,
/// via the registry component named [`DOCUMENT_EXISTS`].
///
/// Config shape:
/// ```json
/// { "name": "profiles",
///   "lookup": true,
///   "map": { "profiles": { "name": "profiles", "not_found": "User not found" } } }
/// ```
/// With `lookup`, the collection key is read from the named document field's
/// value before consulting the map.
pub struct ExistenceCheck;

#[async_trait]
impl CustomCheck for ExistenceCheck {
    async fn run(
        &self,
        ctx: CheckCtx<'_>,
        field: &str,
        value: &Value,
        config: &Value,
        document: &Document,
        errors: &mut ErrorMap,
    ) -> Result<(), ValidationError> {
        let cfg: ExistenceConfig = serde_json::from_value(config.clone())
            .map_err(|e| config_error("check_existence", e))?;

        let key = if cfg.lookup {
            document
                .get(&cfg.name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    config_error(
                        "check_existence",
                        anyhow::anyhow!("lookup field '{}' missing or not a string", cfg.name),
                    )
                })?
        } else {
            cfg.name.clone()
        };

        let meta = cfg.map.get(&key).ok_or_else(|| {
            config_error(
                "check_existence",
                anyhow::anyhow!("collection '{key}' not present in map"),
            )
        })?;

        let registry = ctx.registry.ok_or_else(|| {
            config_error(
                "check_existence",
                anyhow::anyhow!("no registry available to resolve '{DOCUMENT_EXISTS}'"),
            )
        })?;

        // ComponentMissing propagates as a defect, not a field error.
        let checker: Arc<dyn DocumentExists> = registry.get(DOCUMENT_EXISTS)?;

        let found = checker
            .exists(&meta.name, value)
            .await
            .map_err(|e| config_error("check_existence", e))?;

        if !found {
            append_error(errors, field, meta.not_found.clone());
        }
        Ok(())
    }
}

// ---- allowed-path check ----

/// Deserialize a string-or-list-of-strings allow-list; a single string is a
/// one-element list.
fn allow_list(check: &str, config: &Value) -> Result<Vec<String>, ValidationError> {
    match config {
        Value::String(s) => Ok(vec![s.clone()]),
        other => serde_json::from_value(other.clone()).map_err(|e| config_error(check, e)),
    }
}

/// Membership test against an allow-list of path segments. Failure aborts
/// the whole request with a not-found outcome carrying the request path —
/// distinct from every other check, which only annotates the field map.
pub struct AllowedPathCheck;

#[async_trait]
impl CustomCheck for AllowedPathCheck {
    async fn run(
        &self,
        ctx: CheckCtx<'_>,
        _field: &str,
        value: &Value,
        config: &Value,
        _document: &Document,
        _errors: &mut ErrorMap,
    ) -> Result<(), ValidationError> {
        let allowed = allow_list("allowed_path", config)?;
        let matches = value
            .as_str()
            .map(|s| allowed.iter().any(|a| a == s))
            .unwrap_or(false);

        if matches {
            Ok(())
        } else {
            Err(ValidationError::NotFound {
                path: ctx.request_path.map(str::to_string),
            })
        }
    }
}

// ---- allowed-content-type check ----

/// Tests the declared media type of an uploaded-file value (an object with a
/// `type` key) against an allow-list.
pub struct AllowedContentTypeCheck;

#[async_trait]
impl CustomCheck for AllowedContentTypeCheck {
    async fn run(
        &self,
        _ctx: CheckCtx<'_>,
        field: &str,
        value: &Value,
        config: &Value,
        _document: &Document,
        errors: &mut ErrorMap,
    ) -> Result<(), ValidationError> {
        let allowed = allow_list("allowed_content_type", config)?;
        let content_type = value.get("type").and_then(Value::as_str).unwrap_or("");

        if !allowed.iter().any(|a| a == content_type) {
            append_error(errors, field, "Content type not allowed");
        }
        Ok(())
    }
}

// ---- ip-address check ----

/// Tests that the value parses as an IP address (v4 or v6). Takes no
/// configuration.
pub struct IpAddressCheck;

#[async_trait]
impl CustomCheck for IpAddressCheck {
    async fn run(
        &self,
        _ctx: CheckCtx<'_>,
        field: &str,
        value: &Value,
        _config: &Value,
        _document: &Document,
        errors: &mut ErrorMap,
    ) -> Result<(), ValidationError> {
        let ok = value
            .as_str()
            .map(|s| s.parse::<std::net::IpAddr>().is_ok())
            .unwrap_or(false);

        if !ok {
            append_error(errors, field, "Malformed IP address");
        }
        Ok(())
    }
}
