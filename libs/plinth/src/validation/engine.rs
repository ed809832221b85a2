//! The validation engine: pluggable lookup tables for types, coercions,
//! default setters and custom checks, composed instead of inherited.
//!
//! `Engine::with_builtins()` installs the stock set; additional entries are
//! registered explicitly. The engine is constructed once and shared
//! read-only across requests; a validation run touches no mutable state
//! beyond its own document.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::checks::{
    AllowedContentTypeCheck, AllowedPathCheck, CheckCtx, CustomCheck, ExistenceCheck,
    IpAddressCheck,
};
use super::coerce::{self, CoerceFn, DefaultSetterFn};
use super::schema::Schema;
use super::{Document, ErrorMap, ValidationError};
use crate::registry::ComponentRegistry;

pub type TypeCheckFn = fn(&Value) -> bool;

/// What to do with input fields not present in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownFields {
    /// Drop them from the normalized document.
    Purge,
    /// Pass them through untouched.
    Keep,
}

/// Per-invocation options: unknown-field policy plus the ambient request
/// state offered to custom checks.
#[derive(Clone, Copy)]
pub struct ValidateOpts<'a> {
    pub unknown: UnknownFields,
    pub registry: Option<&'a ComponentRegistry>,
    pub request_path: Option<&'a str>,
}

impl Default for ValidateOpts<'_> {
    fn default() -> Self {
        Self {
            unknown: UnknownFields::Purge,
            registry: None,
            request_path: None,
        }
    }
}

pub struct Engine {
    types: HashMap<String, TypeCheckFn>,
    coercions: HashMap<String, CoerceFn>,
    default_setters: HashMap<String, DefaultSetterFn>,
    checks: HashMap<String, Arc<dyn CustomCheck>>,
}

impl Engine {
    /// An empty engine: no types, coercions, setters or checks.
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
            coercions: HashMap::new(),
            default_setters: HashMap::new(),
            checks: HashMap::new(),
        }
    }

    /// Engine with the builtin tables installed.
    pub fn with_builtins() -> Self {
        let mut e = Self::new();

        e.register_type("string", |v| v.is_string());
        e.register_type("integer", |v| v.is_i64() || v.is_u64());
        e.register_type("float", |v| v.is_number());
        e.register_type("boolean", |v| v.is_boolean());
        e.register_type("list", |v| v.is_array());
        e.register_type("dict", |v| v.is_object());
        e.register_type("datetime", |v| {
            v.as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false)
        });
        e.register_type("object_id", |v| {
            v.as_str()
                .map(|s| coerce::parse_object_id(s).is_ok())
                .unwrap_or(false)
        });
        // An uploaded file travels through the document as an object with
        // name/type/body keys.
        e.register_type("file", |v| {
            v.as_object()
                .map(|o| o.contains_key("name") && o.contains_key("type"))
                .unwrap_or(false)
        });

        e.register_coercion("json", coerce::json);
        e.register_coercion("first", coerce::first);
        e.register_coercion("object_id", coerce::object_id);
        e.register_coercion("empty_or_object_id", coerce::empty_or_object_id);
        e.register_coercion("boolean", coerce::boolean);
        e.register_coercion("integer", coerce::integer);
        e.register_coercion("float", coerce::float);

        e.register_default_setter("array_wrap", coerce::array_wrap);
        e.register_default_setter("timestamp", coerce::timestamp);

        e.register_check("check_existence", Arc::new(ExistenceCheck));
        e.register_check("allowed_path", Arc::new(AllowedPathCheck));
        e.register_check("allowed_content_type", Arc::new(AllowedContentTypeCheck));
        e.register_check("ip_address", Arc::new(IpAddressCheck));

        e
    }

    pub fn register_type(&mut self, tag: impl Into<String>, check: TypeCheckFn) {
        self.types.insert(tag.into(), check);
    }

    pub fn register_coercion(&mut self, name: impl Into<String>, coerce: CoerceFn) {
        self.coercions.insert(name.into(), coerce);
    }

    pub fn register_default_setter(&mut self, name: impl Into<String>, setter: DefaultSetterFn) {
        self.default_setters.insert(name.into(), setter);
    }

    pub fn register_check(&mut self, name: impl Into<String>, check: Arc<dyn CustomCheck>) {
        self.checks.insert(name.into(), check);
    }

    /// Validate `input` against `schema`.
    ///
    /// Per-field pipeline, in fixed order: default-filling → coercion →
    /// type check → custom checks in declared order. The error map keeps one
    /// entry per field (the first failing rule); custom checks append
    /// independently without stopping their siblings. Partial success is not
    /// surfaced: any field error fails the whole document.
    pub async fn validate(
        &self,
        schema: &Schema,
        input: &Document,
        opts: ValidateOpts<'_>,
    ) -> Result<Document, ValidationError> {
        let mut normalized = Document::new();
        let mut errors = ErrorMap::new();

        let ctx = CheckCtx {
            registry: opts.registry,
            request_path: opts.request_path,
        };

        for (field, rule) in schema.fields() {
            // 1) default-filling
            let mut value = match input.get(field) {
                Some(v) => v.clone(),
                None => match rule.default_setter_name() {
                    Some(name) => {
                        let setter = self.default_setter(name)?;
                        setter(input)
                    }
                    None => {
                        if rule.is_required() {
                            errors.insert(field.to_string(), "required field".to_string());
                        }
                        continue;
                    }
                },
            };

            // 2) coercion — never skipped, even for synthesized defaults
            if let Some(name) = rule.coercion_name() {
                let coerce = self.coercion(name)?;
                match coerce(&value) {
                    Ok(v) => value = v,
                    Err(e) => {
                        tracing::debug!(field, coercion = name, error = %e, "coercion failed");
                        errors.insert(field.to_string(), type_mismatch(rule.type_tag()));
                        continue;
                    }
                }
            }

            // 3) type check
            if let Some(tag) = rule.type_tag() {
                let check = self.type_check(tag)?;
                if !check(&value) {
                    errors.insert(field.to_string(), type_mismatch(Some(tag)));
                    continue;
                }
            }

            // 4) custom checks, declared order, siblings independent
            for spec in rule.checks() {
                let check = self.check(&spec.name)?;
                check
                    .run(ctx, field, &value, &spec.config, input, &mut errors)
                    .await?;
            }

            normalized.insert(field.to_string(), value);
        }

        if opts.unknown == UnknownFields::Keep {
            for (k, v) in input {
                if !schema.contains(k) {
                    normalized.insert(k.clone(), v.clone());
                }
            }
        }

        if errors.is_empty() {
            Ok(normalized)
        } else {
            Err(ValidationError::Invalid(errors))
        }
    }

    // ---- table lookups; a miss is an engine-configuration defect ----

    fn type_check(&self, tag: &str) -> Result<&TypeCheckFn, ValidationError> {
        self.types.get(tag).ok_or_else(|| ValidationError::Check {
            check: tag.to_string(),
            source: anyhow::anyhow!("unknown type tag '{tag}'"),
        })
    }

    fn coercion(&self, name: &str) -> Result<&CoerceFn, ValidationError> {
        self.coercions
            .get(name)
            .ok_or_else(|| ValidationError::Check {
                check: name.to_string(),
                source: anyhow::anyhow!("unknown coercion '{name}'"),
            })
    }

    fn default_setter(&self, name: &str) -> Result<&DefaultSetterFn, ValidationError> {
        self.default_setters
            .get(name)
            .ok_or_else(|| ValidationError::Check {
                check: name.to_string(),
                source: anyhow::anyhow!("unknown default setter '{name}'"),
            })
    }

    fn check(&self, name: &str) -> Result<&Arc<dyn CustomCheck>, ValidationError> {
        self.checks.get(name).ok_or_else(|| ValidationError::Check {
            check: name.to_string(),
            source: anyhow::anyhow!("unknown check '{name}'"),
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn type_mismatch(tag: Option<&str>) -> String {
    match tag {
        Some(t) => format!("must be of {t} type"),
        None => "invalid value".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use crate::validation::checks::{DocumentExists, DOCUMENT_EXISTS};
    use crate::validation::schema::FieldRule;
    use async_trait::async_trait;
    use serde_json::json;

    const OID: &str = "507f1f77bcf86cd799439011";

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn happy_path_coerces_and_purges_unknown() {
        let engine = Engine::with_builtins();
        let schema = Schema::builder()
            .field(
                "profile_id",
                FieldRule::new().typed("object_id").coerce("object_id").required(),
            )
            .field("count", FieldRule::new().typed("integer").coerce("integer"))
            .build();

        let input = doc(&[
            ("profile_id", json!(OID.to_ascii_uppercase())),
            ("count", json!("42")),
            ("stray", json!("dropped")),
        ]);

        let out = engine
            .validate(&schema, &input, ValidateOpts::default())
            .await
            .unwrap();

        assert_eq!(out["profile_id"], json!(OID));
        assert_eq!(out["count"], json!(42));
        assert!(!out.contains_key("stray"));
    }

    #[tokio::test]
    async fn keep_policy_passes_unknown_fields_through() {
        let engine = Engine::with_builtins();
        let schema = Schema::builder()
            .field("name", FieldRule::new().typed("string"))
            .build();

        let input = doc(&[("name", json!("x")), ("extra", json!(1))]);
        let opts = ValidateOpts {
            unknown: UnknownFields::Keep,
            ..Default::default()
        };

        let out = engine.validate(&schema, &input, opts).await.unwrap();
        assert_eq!(out["extra"], json!(1));
    }

    #[tokio::test]
    async fn required_field_missing_is_reported() {
        let engine = Engine::with_builtins();
        let schema = Schema::builder()
            .field("name", FieldRule::new().typed("string").required())
            .build();

        let err = engine
            .validate(&schema, &Document::new(), ValidateOpts::default())
            .await
            .unwrap_err();

        match err {
            ValidationError::Invalid(map) => {
                assert_eq!(map["name"], "required field");
                assert_eq!(map.len(), 1);
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_identifier_becomes_a_field_error() {
        let engine = Engine::with_builtins();
        let schema = Schema::builder()
            .field(
                "profile_id",
                FieldRule::new().typed("object_id").coerce("object_id"),
            )
            .build();

        let input = doc(&[("profile_id", json!("definitely-not-hex"))]);
        let err = engine
            .validate(&schema, &input, ValidateOpts::default())
            .await
            .unwrap_err();

        match err {
            ValidationError::Invalid(map) => {
                assert_eq!(map["profile_id"], "must be of object_id type");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn default_is_synthesized_then_coerced() {
        // A field with both a default setter and a coercion, given no input:
        // the coercion must run on the synthesized value.
        let engine = Engine::with_builtins();
        let schema = Schema::builder()
            .field(
                "created_at",
                FieldRule::new()
                    .typed("string")
                    .default_setter("timestamp")
                    .coerce("first"),
            )
            .build();

        let out = engine
            .validate(&schema, &Document::new(), ValidateOpts::default())
            .await
            .unwrap();

        // timestamp yields ["<unix>"]; first unwraps it to the string
        let ts: i64 = out["created_at"].as_str().unwrap().parse().unwrap();
        assert!(ts > 1_500_000_000);
    }

    #[tokio::test]
    async fn boolean_coercion_through_the_engine() {
        let engine = Engine::with_builtins();
        let schema = Schema::builder()
            .field("flag", FieldRule::new().typed("boolean").coerce("boolean"))
            .build();

        for (raw, expected) in [
            (json!("true"), true),
            (json!("TRUE"), true),
            (json!("1"), true),
            (json!("false"), false),
            (json!("0"), false),
            (json!(""), false),
            (json!(0), false),
            (json!(3), true),
        ] {
            let input = doc(&[("flag", raw.clone())]);
            let out = engine
                .validate(&schema, &input, ValidateOpts::default())
                .await
                .unwrap();
            assert_eq!(out["flag"], json!(expected), "input {raw:?}");
        }
    }

    struct SetOracle(std::collections::HashSet<String>);

    #[async_trait]
    impl DocumentExists for SetOracle {
        async fn exists(&self, _collection: &str, value: &Value) -> anyhow::Result<bool> {
            Ok(value.as_str().map(|s| self.0.contains(s)).unwrap_or(false))
        }
    }

    fn registry_with_ids(ids: &[&str]) -> ComponentRegistry {
        let mut b = RegistryBuilder::new();
        let oracle: Arc<dyn DocumentExists> =
            Arc::new(SetOracle(ids.iter().map(|s| s.to_string()).collect()));
        b.register_instance(DOCUMENT_EXISTS, oracle);
        b.freeze()
    }

    fn existence_schema() -> Schema {
        Schema::builder()
            .field(
                "profile_id",
                FieldRule::new()
                    .typed("object_id")
                    .coerce("object_id")
                    .check(
                        "check_existence",
                        json!({
                            "name": "profiles",
                            "map": { "profiles": { "name": "profiles", "not_found": "User not found" } }
                        }),
                    ),
            )
            .field("note", FieldRule::new().typed("string"))
            .build()
    }

    #[tokio::test]
    async fn ip_address_is_a_builtin_check() {
        let engine = Engine::with_builtins();
        let schema = Schema::builder()
            .field(
                "address",
                FieldRule::new()
                    .typed("string")
                    .check("ip_address", Value::Null),
            )
            .build();

        let input = doc(&[("address", json!("127.0.0.1"))]);
        let out = engine
            .validate(&schema, &input, ValidateOpts::default())
            .await
            .unwrap();
        assert_eq!(out["address"], json!("127.0.0.1"));

        let input = doc(&[("address", json!("localhost"))]);
        let err = engine
            .validate(&schema, &input, ValidateOpts::default())
            .await
            .unwrap_err();
        match err {
            ValidationError::Invalid(map) => {
                assert_eq!(map["address"], "Malformed IP address");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn existence_check_marks_exactly_the_failing_field() {
        let engine = Engine::with_builtins();
        let registry = registry_with_ids(&[]);
        let opts = ValidateOpts {
            registry: Some(&registry),
            ..Default::default()
        };

        let input = doc(&[("profile_id", json!(OID)), ("note", json!("hello"))]);
        let err = engine
            .validate(&existence_schema(), &input, opts)
            .await
            .unwrap_err();

        match err {
            ValidationError::Invalid(map) => {
                assert_eq!(map.len(), 1);
                assert_eq!(map["profile_id"], "User not found");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn validation_is_idempotent_with_a_stable_oracle() {
        let engine = Engine::with_builtins();
        let registry = registry_with_ids(&[OID]);
        let opts = ValidateOpts {
            registry: Some(&registry),
            ..Default::default()
        };

        let input = doc(&[("profile_id", json!(OID)), ("note", json!("hello"))]);

        let first = engine
            .validate(&existence_schema(), &input, opts)
            .await
            .unwrap();
        let second = engine
            .validate(&existence_schema(), &input, opts)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn allowed_path_abort_wins_over_field_errors() {
        let engine = Engine::with_builtins();
        let schema = Schema::builder()
            .field(
                "path",
                FieldRule::new()
                    .typed("string")
                    .check("allowed_path", json!(["likes", "views"])),
            )
            .build();

        let input = doc(&[("path", json!("dislikes"))]);
        let opts = ValidateOpts {
            request_path: Some("/stats/dislikes"),
            ..Default::default()
        };

        let err = engine.validate(&schema, &input, opts).await.unwrap_err();
        match err {
            ValidationError::NotFound { path } => {
                assert_eq!(path.as_deref(), Some("/stats/dislikes"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sibling_checks_run_after_one_appends() {
        use crate::validation::checks::CheckCtx;
        use std::sync::atomic::{AtomicBool, Ordering};

        static SECOND_RAN: AtomicBool = AtomicBool::new(false);

        struct AlwaysFails;
        #[async_trait]
        impl crate::validation::checks::CustomCheck for AlwaysFails {
            async fn run(
                &self,
                _ctx: CheckCtx<'_>,
                field: &str,
                _value: &Value,
                _config: &Value,
                _document: &Document,
                errors: &mut ErrorMap,
            ) -> Result<(), ValidationError> {
                errors
                    .entry(field.to_string())
                    .or_insert_with(|| "first failure".to_string());
                Ok(())
            }
        }

        struct Observer;
        #[async_trait]
        impl crate::validation::checks::CustomCheck for Observer {
            async fn run(
                &self,
                _ctx: CheckCtx<'_>,
                _field: &str,
                _value: &Value,
                _config: &Value,
                _document: &Document,
                _errors: &mut ErrorMap,
            ) -> Result<(), ValidationError> {
                SECOND_RAN.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let mut engine = Engine::with_builtins();
        engine.register_check("always_fails", Arc::new(AlwaysFails));
        engine.register_check("observer", Arc::new(Observer));

        let schema = Schema::builder()
            .field(
                "v",
                FieldRule::new()
                    .typed("string")
                    .check("always_fails", Value::Null)
                    .check("observer", Value::Null),
            )
            .build();

        let input = doc(&[("v", json!("x"))]);
        let err = engine
            .validate(&schema, &input, ValidateOpts::default())
            .await
            .unwrap_err();

        assert!(SECOND_RAN.load(Ordering::SeqCst), "sibling check must run");
        match err {
            ValidationError::Invalid(map) => assert_eq!(map["v"], "first failure"),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}
