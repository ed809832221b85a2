//! Handler adapters: tower layers binding a schema to a request-data source.
//!
//! Three flavors share one service:
//!
//! - [`validate_path`] — validates router path parameters, stores the
//!   normalized document as [`NormalizedPath`];
//! - [`validate_request`] — validates one body/query source and files the
//!   normalized document into the [`Validated`] accumulator under the
//!   source's name (stackable, one layer per source);
//! - [`validate`] — like `validate_request`, but the normalized document is
//!   only handed to the handler when the adapter was built with
//!   [`ValidationLayer::expose`]; without it the document is checked and
//!   discarded.
//!
//! Failure mapping: field errors become a 400 problem carrying the error
//! map, an allowed-path abort becomes a 404 problem, and registry or check
//! defects become a 500 problem (logged, details withheld from the client).

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::{to_bytes, Body},
    extract::{FromRequest, FromRequestParts, Query, RawPathParams, Request},
    http::{request::Parts, Method},
    response::{IntoResponse, Response},
    Form,
};
use futures::future::BoxFuture;
use serde_json::Value;
use tower::{Layer, Service};

use super::engine::{Engine, UnknownFields, ValidateOpts};
use super::schema::Schema;
use super::{Document, ValidationError};
use crate::problem::{internal_error, not_found, validation_failed, ProblemResponse};
use crate::registry::ComponentRegistry;

/// Upper bound on a buffered request body.
const BODY_LIMIT: usize = 4 * 1024 * 1024;

/// Where a request-validating adapter reads its raw document from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Query,
    Form,
    Json,
}

impl Source {
    /// Namespace key under which the normalized document is filed.
    pub fn name(self) -> &'static str {
        match self {
            Source::Query => "query",
            Source::Form => "form",
            Source::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Style {
    Path,
    Namespaced(Source),
    Conditional { source: Source, expose: bool },
}

/// Normalized path parameters, stored by [`validate_path`].
#[derive(Debug, Clone, Default)]
pub struct NormalizedPath(pub Document);

/// Accumulator of normalized documents, keyed by source name. Each
/// [`validate_request`] layer on the route adds its own entry.
#[derive(Debug, Clone, Default)]
pub struct Validated(pub BTreeMap<String, Document>);

impl Validated {
    pub fn get(&self, source: &str) -> Option<&Document> {
        self.0.get(source)
    }
}

/// Documents exposed by conditional adapters, keyed by source name. Empty
/// unless some layer on the route was built with `expose`.
#[derive(Debug, Clone, Default)]
pub struct Docs(pub BTreeMap<String, Document>);

impl<S: Send + Sync> FromRequestParts<S> for Validated {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Validated>().cloned().unwrap_or_default())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Docs {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Docs>().cloned().unwrap_or_default())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for NormalizedPath {
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<NormalizedPath>().cloned().ok_or_else(|| {
            tracing::error!("NormalizedPath extracted without a path validation layer");
            internal_error("path validation is not configured for this route")
        })
    }
}

/// Layer validating router path parameters against `schema`. Unknown path
/// parameters are passed through untouched.
pub fn validate_path(engine: Arc<Engine>, schema: Schema) -> ValidationLayer {
    ValidationLayer::new(engine, schema, Style::Path)
}

/// Layer validating one request-data source and filing the result into
/// [`Validated`].
pub fn validate_request(engine: Arc<Engine>, schema: Schema, source: Source) -> ValidationLayer {
    ValidationLayer::new(engine, schema, Style::Namespaced(source))
}

/// Layer validating one request-data source without handing the document to
/// the handler; chain [`ValidationLayer::expose`] to opt in.
pub fn validate(engine: Arc<Engine>, schema: Schema, source: Source) -> ValidationLayer {
    ValidationLayer::new(engine, schema, Style::Conditional { source, expose: false })
}

#[derive(Clone)]
pub struct ValidationLayer {
    engine: Arc<Engine>,
    schema: Arc<Schema>,
    style: Style,
}

impl ValidationLayer {
    fn new(engine: Arc<Engine>, schema: Schema, style: Style) -> Self {
        Self {
            engine,
            schema: Arc::new(schema),
            style,
        }
    }

    /// Hand the normalized document to the handler via [`Docs`]. Only
    /// meaningful on adapters built with [`validate`].
    pub fn expose(mut self) -> Self {
        if let Style::Conditional { ref mut expose, .. } = self.style {
            *expose = true;
        }
        self
    }
}

impl<S> Layer<S> for ValidationLayer {
    type Service = ValidationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidationService {
            inner,
            engine: self.engine.clone(),
            schema: self.schema.clone(),
            style: self.style,
        }
    }
}

#[derive(Clone)]
pub struct ValidationService<S> {
    inner: S,
    engine: Arc<Engine>,
    schema: Arc<Schema>,
    style: Style,
}

impl<S> Service<Request> for ValidationService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // The clone is the not-ready one; keep the polled service for the call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let engine = self.engine.clone();
        let schema = self.schema.clone();
        let style = self.style;

        Box::pin(async move {
            match apply(&engine, &schema, style, req).await {
                Ok(req) => inner.call(req).await,
                Err(resp) => Ok(resp),
            }
        })
    }
}

/// Run the pipeline for one adapter and thread the outcome back into the
/// request, or produce the problem response that short-circuits it.
async fn apply(
    engine: &Engine,
    schema: &Schema,
    style: Style,
    req: Request,
) -> Result<Request, Response> {
    let registry = req.extensions().get::<Arc<ComponentRegistry>>().cloned();
    let request_path = req.uri().path().to_string();

    let (mut parts, body) = req.into_parts();

    // Query and path adapters leave the body for downstream consumers; body
    // sources buffer it and hand an empty one on.
    let (input, unknown, body) = match style {
        Style::Path => (path_document(&mut parts).await, UnknownFields::Keep, body),
        Style::Namespaced(source) | Style::Conditional { source, .. } => {
            let (doc, rest) = source_document(source, &mut parts, body).await?;
            (doc, UnknownFields::Purge, rest)
        }
    };

    let opts = ValidateOpts {
        unknown,
        registry: registry.as_deref(),
        request_path: Some(request_path.as_str()),
    };

    let normalized = match engine.validate(schema, &input, opts).await {
        Ok(doc) => doc,
        Err(ValidationError::Invalid(errors)) => {
            return Err(validation_failed(errors).into_response());
        }
        Err(ValidationError::NotFound { path }) => {
            let detail = ValidationError::not_found_detail(path.as_deref());
            return Err(not_found(detail).into_response());
        }
        Err(err @ (ValidationError::Registry(_) | ValidationError::Check { .. })) => {
            tracing::error!(error = %err, path = %request_path, "validation defect");
            return Err(internal_error("request validation failed internally").into_response());
        }
    };

    match style {
        Style::Path => {
            parts.extensions.insert(NormalizedPath(normalized));
        }
        Style::Namespaced(source) => {
            if parts.extensions.get::<Validated>().is_none() {
                parts.extensions.insert(Validated::default());
            }
            if let Some(v) = parts.extensions.get_mut::<Validated>() {
                v.0.insert(source.name().to_string(), normalized);
            }
        }
        Style::Conditional { source, expose } => {
            if expose {
                if parts.extensions.get::<Docs>().is_none() {
                    parts.extensions.insert(Docs::default());
                }
                if let Some(d) = parts.extensions.get_mut::<Docs>() {
                    d.0.insert(source.name().to_string(), normalized);
                }
            }
        }
    }

    Ok(Request::from_parts(parts, body))
}

/// Raw router path parameters as a string-valued document.
async fn path_document(parts: &mut Parts) -> Document {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect(),
        Err(_) => Document::new(),
    }
}

/// Read the raw document for a body/query source, returning the body left
/// for downstream consumers. Repeated keys collapse into an array of strings
/// so that a `first` coercion can pick the head.
async fn source_document(
    source: Source,
    parts: &mut Parts,
    body: Body,
) -> Result<(Document, Body), Response> {
    match source {
        Source::Query => {
            let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
                .map_err(|e| validation_failed_parse("query", &e.to_string()))?;
            Ok((group_pairs(pairs), body))
        }
        Source::Form => {
            let bytes = to_bytes(body, BODY_LIMIT)
                .await
                .map_err(|e| validation_failed_parse("form", &e.to_string()))?;
            // A throwaway request so the form extractor reads the body, not
            // the query string.
            let mut tmp = Request::new(Body::from(bytes));
            *tmp.method_mut() = Method::POST;
            *tmp.headers_mut() = parts.headers.clone();
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(tmp, &())
                .await
                .map_err(|e| validation_failed_parse("form", &e.to_string()))?;
            Ok((group_pairs(pairs), Body::empty()))
        }
        Source::Json => {
            let bytes = to_bytes(body, BODY_LIMIT)
                .await
                .map_err(|e| validation_failed_parse("json", &e.to_string()))?;
            let doc = if bytes.is_empty() {
                Document::new()
            } else {
                serde_json::from_slice::<Document>(&bytes)
                    .map_err(|e| validation_failed_parse("json", &e.to_string()))?
            };
            Ok((doc, Body::empty()))
        }
    }
}

fn validation_failed_parse(source: &str, detail: &str) -> Response {
    tracing::debug!(source, detail, "unreadable request document");
    crate::problem::bad_request(format!("malformed {source} payload")).into_response()
}

/// Single occurrence → string; repeats → array of strings in arrival order.
fn group_pairs(pairs: Vec<(String, String)>) -> Document {
    let mut doc = Document::new();
    for (k, v) in pairs {
        match doc.get_mut(&k) {
            None => {
                doc.insert(k, Value::String(v));
            }
            Some(Value::Array(items)) => items.push(Value::String(v)),
            Some(existing) => {
                let head = existing.take();
                *existing = Value::Array(vec![head, Value::String(v)]);
            }
        }
    }
    doc
}
