//! Pure builders for aggregation-pipeline fragments.
//!
//! Consumed by custom checks and handlers that talk to a document store;
//! nothing here touches the network. Every builder returns a plain JSON
//! value ready to be embedded in a pipeline.

use serde_json::{json, Map, Value};

/// Sort fragment from an ordered field list.
///
/// Fields deduplicate case-insensitively, keeping the first occurrence's
/// casing to decide direction: a field carrying upper case requests
/// ascending (`1`), all-lower-case requests descending (`-1`). Keys are
/// emitted lower-cased, in input order.
pub fn sort(fields: &[&str]) -> Value {
    let mut out = Map::new();
    for field in fields {
        let key = field.to_lowercase();
        if out.contains_key(&key) {
            continue;
        }
        let ascending = field.chars().any(|c| c.is_uppercase());
        out.insert(key, json!(if ascending { 1 } else { -1 }));
    }
    Value::Object(out)
}

/// One output binding of a [`group`] stage.
#[derive(Debug, Clone)]
pub struct GroupField<'a> {
    /// Name of the accumulated output field.
    pub output: &'a str,
    /// Source document field to accumulate.
    pub source: &'a str,
    /// Stringify each accumulated element.
    pub stringify: bool,
}

impl<'a> GroupField<'a> {
    pub fn new(output: &'a str, source: &'a str) -> Self {
        Self {
            output,
            source,
            stringify: false,
        }
    }

    pub fn stringified(output: &'a str, source: &'a str) -> Self {
        Self {
            output,
            source,
            stringify: true,
        }
    }
}

/// `$group` collapsing the whole input into one document of `$addToSet`
/// accumulations, followed by a `$project` dropping the synthetic `_id`.
pub fn group(fields: &[GroupField<'_>]) -> Vec<Value> {
    let mut stage = Map::new();
    stage.insert("_id".to_string(), Value::Null);
    for f in fields {
        let path = format!("${}", f.source);
        let element = if f.stringify {
            json!({ "$toString": path })
        } else {
            Value::String(path)
        };
        stage.insert(f.output.to_string(), json!({ "$addToSet": element }));
    }

    vec![
        json!({ "$group": stage }),
        json!({ "$project": { "_id": 0 } }),
    ]
}

/// Extract `subfield` from the first element of a one-or-zero-element array
/// field; an empty array passes through unchanged.
pub fn facet_extract(field: &str, subfield: &str) -> Value {
    let path = format!("${field}");
    json!({
        "$cond": [
            { "$gt": [{ "$size": path.clone() }, 0] },
            { "$let": {
                "vars": { "temp": { "$arrayElemAt": [path.clone(), 0] } },
                "in": format!("$$temp.{subfield}")
            }},
            path
        ]
    })
}

/// Stringify every element of an array field.
pub fn to_strings(field: &str) -> Value {
    json!({
        "$map": {
            "input": format!("${field}"),
            "as": "temp",
            "in": { "$toString": "$$temp" }
        }
    })
}

/// Drop the field entirely when its array value is empty.
pub fn remove_field_if_empty(field: &str) -> Value {
    let path = format!("${field}");
    json!({
        "$cond": [{ "$gt": [{ "$size": path.clone() }, 0] }, path, "$$REMOVE"]
    })
}
