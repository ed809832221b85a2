//! Schema-driven validation/coercion engine and its handler adapters.
//!
//! Per-field pipeline, in fixed order: default-filling → coercion → type
//! check → custom checks. Output is either a field → message error map or a
//! normalized document.

pub mod adapters;
pub mod checks;
pub mod coerce;
pub mod engine;
pub mod schema;

use std::collections::BTreeMap;
use thiserror::Error;

use crate::registry::RegistryError;

/// A raw or normalized request document.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Field name → human-readable message, one entry per first failing rule.
pub type ErrorMap = BTreeMap<String, String>;

/// Failure modes of a validation run.
///
/// Only `Invalid` and `NotFound` are expected, locally recoverable outcomes
/// (400- and 404-equivalent at the adapter boundary). `Registry` and `Check`
/// are defects surfaced to the operator (500-equivalent).
#[derive(Debug, Error)]
pub enum ValidationError {
    /// One or more field errors; validation fails as a whole.
    #[error("validation failed for {} field(s)", .0.len())]
    Invalid(ErrorMap),

    /// Raised by the allowed-path check: aborts the whole request with a
    /// not-found outcome instead of annotating a field.
    #[error("{}", not_found_detail(.path.as_deref()))]
    NotFound { path: Option<String> },

    /// Registry consultation failed (e.g. `document_exists` not registered).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A check or engine-configuration failure outside the error map.
    #[error("check '{check}' failed")]
    Check {
        check: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ValidationError {
    /// Human-readable detail line for the not-found outcome.
    pub fn not_found_detail(path: Option<&str>) -> String {
        not_found_detail(path)
    }
}

fn not_found_detail(path: Option<&str>) -> String {
    match path {
        Some(p) => format!("Requested URL {p} not found"),
        None => "Requested URL not found".to_string(),
    }
}
