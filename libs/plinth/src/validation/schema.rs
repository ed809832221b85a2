//! Schema model: per-field rule sets, declared once per handler and reused
//! across requests.

use serde_json::Value;

/// A named custom check plus its configuration, resolved against the
/// engine's check table at validation time.
#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub name: String,
    pub config: Value,
}

/// Rule set for a single field. All parts are optional; declaration order of
/// checks is the execution order.
#[derive(Debug, Clone, Default)]
pub struct FieldRule {
    type_tag: Option<String>,
    required: bool,
    default_setter: Option<String>,
    coerce: Option<String>,
    checks: Vec<CheckSpec>,
}

impl FieldRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declared type tag, verified after coercion ("string", "integer",
    /// "object_id", "file", ...).
    pub fn typed(mut self, tag: impl Into<String>) -> Self {
        self.type_tag = Some(tag.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Default setter applied when the input value is missing; the coercion
    /// still runs on the synthesized value.
    pub fn default_setter(mut self, name: impl Into<String>) -> Self {
        self.default_setter = Some(name.into());
        self
    }

    pub fn coerce(mut self, name: impl Into<String>) -> Self {
        self.coerce = Some(name.into());
        self
    }

    pub fn check(mut self, name: impl Into<String>, config: Value) -> Self {
        self.checks.push(CheckSpec {
            name: name.into(),
            config,
        });
        self
    }

    // ---- read accessors used by the engine ----

    pub fn type_tag(&self) -> Option<&str> {
        self.type_tag.as_deref()
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default_setter_name(&self) -> Option<&str> {
        self.default_setter.as_deref()
    }

    pub fn coercion_name(&self) -> Option<&str> {
        self.coerce.as_deref()
    }

    pub fn checks(&self) -> &[CheckSpec] {
        &self.checks
    }
}

/// Field name → rule set, in declaration order. Static configuration:
/// constructed once, shared read-only across requests.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<(String, FieldRule)>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.fields.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<(String, FieldRule)>,
}

impl SchemaBuilder {
    /// Add a field rule. Re-declaring a field replaces the previous rule in
    /// place, keeping the original position.
    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = rule;
        } else {
            self.fields.push((name, rule));
        }
        self
    }

    pub fn build(self) -> Schema {
        Schema {
            fields: self.fields,
        }
    }
}
