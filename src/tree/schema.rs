//! Schema documents and the walker that turns them into child entries.
//!
//! A backend schema is an OpenAPI-like document: a `paths` table mapping
//! path patterns (possibly containing one named-placeholder segment such
//! as `/secret/data/{name}`) to their operations. Documents are parsed
//! once, shared read-only, and replaced wholesale on refresh so
//! concurrent readers never observe a half-updated schema.

use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::{OpstrayError, Result, tree::node::ResourceNode, utils};

/// Regex pattern for named-placeholder path segments.
/// Format: `{name}`
const PLACEHOLDER_PATTERN: &str = r"^\{([A-Za-z0-9_-]+)\}$";

/// One path pattern of a schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaPath {
    pub pattern: String,
    /// Named placeholders appearing in the pattern, in segment order.
    pub parameters: Vec<String>,
    /// Operation names (get, post, list, delete, ...), declaration order.
    pub operations: Vec<String>,
}

/// A parsed backend schema.
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    pub backend: String,
    pub version: String,
    /// Path table in declaration order; backend grouping is intentional
    /// and must not be re-sorted.
    pub paths: Vec<SchemaPath>,
    pub fetched_at: i64,
    pub ttl_millis: i64,
}

impl SchemaDocument {
    /// Parse a fetched schema document, validating its overall shape
    /// first. Malformed documents yield a Schema error and the affected
    /// node stays an unexpandable leaf.
    pub fn from_json(
        backend: &str,
        document: &Value,
        ttl: Duration,
    ) -> Result<Self> {
        validate_shape(document)?;

        let version = document.get("openapi").or_else(|| document.get("version")).and_then(Value::as_str).unwrap_or_default().to_string();

        let segment_re = placeholder_regex();
        let mut paths = Vec::new();
        for (pattern, spec) in document["paths"].as_object().into_iter().flatten() {
            let operations = spec
                .as_object()
                .map(|ops| ops.keys().filter(|k| k.as_str() != "parameters").cloned().collect())
                .unwrap_or_default();
            let parameters = pattern
                .split('/')
                .filter_map(|segment| segment_re.captures(segment).map(|c| c[1].to_string()))
                .collect();
            paths.push(SchemaPath {
                pattern: pattern.clone(),
                parameters,
                operations,
            });
        }

        Ok(Self {
            backend: backend.to_string(),
            version,
            paths,
            fetched_at: utils::time::time_millis(),
            ttl_millis: ttl.as_millis() as i64,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.ttl_millis > 0 && utils::time::time_millis() - self.fetched_at >= self.ttl_millis
    }
}

fn validate_shape(document: &Value) -> Result<()> {
    let meta = serde_json::json!({
        "type": "object",
        "required": ["paths"],
        "properties": {
            "paths": {
                "type": "object",
                "additionalProperties": { "type": "object" }
            }
        }
    });
    let validator = jsonschema::validator_for(&meta).map_err(|e| OpstrayError::Schema(e.to_string()))?;
    validator.validate(document)?;
    Ok(())
}

fn placeholder_regex() -> Regex {
    Regex::new(PLACEHOLDER_PATTERN).unwrap()
}

/// A child entry discovered under a schema path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChild {
    /// A fixed path segment; one Folder per operation group.
    Static {
        segment: String,
        operations: Vec<String>,
        /// True when the schema declares a placeholder directly beneath
        /// this segment (the segment names a collection).
        collection: bool,
    },
    /// A named-placeholder segment to be resolved against the collection's
    /// list operation.
    Placeholder {
        name: String,
        pattern: String,
        list_path: String,
    },
}

/// Enumerate the immediate child segments declared under `prefix`, in
/// schema declaration order. Duplicate segments (one pattern per
/// operation depth) collapse into a single entry with merged operations.
pub fn children_of(
    schema: &SchemaDocument,
    prefix: &str,
) -> Vec<SchemaChild> {
    let base = prefix.trim_end_matches('/');
    let segment_re = placeholder_regex();

    let mut children: Vec<SchemaChild> = Vec::new();
    for path in &schema.paths {
        let Some(rest) = path.pattern.strip_prefix(base).and_then(|r| r.strip_prefix('/')) else {
            continue;
        };
        let Some(segment) = rest.split('/').next().filter(|s| !s.is_empty()) else {
            continue;
        };
        let terminal = rest == segment;

        if let Some(caps) = segment_re.captures(segment) {
            let name = caps[1].to_string();
            if !children.iter().any(|c| matches!(c, SchemaChild::Placeholder { name: n, .. } if *n == name)) {
                children.push(SchemaChild::Placeholder {
                    name,
                    pattern: format!("{}/{}", base, segment),
                    list_path: base.to_string(),
                });
            }
            continue;
        }

        let operations = if terminal {
            path.operations.clone()
        } else {
            Vec::new()
        };
        match children.iter_mut().find(|c| matches!(c, SchemaChild::Static { segment: s, .. } if *s == segment)) {
            Some(SchemaChild::Static {
                operations: existing,
                ..
            }) => {
                for op in operations {
                    if !existing.contains(&op) {
                        existing.push(op);
                    }
                }
            }
            _ => {
                children.push(SchemaChild::Static {
                    segment: segment.to_string(),
                    operations,
                    collection: false,
                });
            }
        }
    }

    // second pass: a static segment is a collection when the schema
    // declares a placeholder directly beneath it
    for child in children.iter_mut() {
        if let SchemaChild::Static {
            segment,
            collection,
            ..
        } = child
        {
            let under = format!("{}/{}/{{", base, segment);
            *collection = schema.paths.iter().any(|p| p.pattern.starts_with(&under));
        }
    }

    children
}

/// Produce one Placeholder-derived node per listed name, each pointing at
/// the instantiated path.
pub fn resolve_placeholder(
    backend: &str,
    pattern: &str,
    names: &[String],
) -> Vec<ResourceNode> {
    let re = Regex::new(r"\{[A-Za-z0-9_-]+\}").unwrap();
    let Some(placeholder) = re.find(pattern).map(|m| m.as_str().to_string()) else {
        return Vec::new();
    };

    names
        .iter()
        .map(|name| {
            let path = pattern.replace(&placeholder, name);
            ResourceNode::placeholder(backend, name, &path, pattern)
        })
        .collect()
}
