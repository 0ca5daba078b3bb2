//! Attribute values and deferred references.
//!
//! Attribute bags are arbitrary nested data. A value may embed an
//! [`AttributeReference`]: a pointer to another node's *output* attribute that
//! only becomes known after that node applies. In stack files a reference is
//! written as the single-key map `{"$ref": "<resource>.<attribute>"}`.
//!
//! A string built from outputs is written as `{"$template": "..."}`, where
//! each `${<resource>.<attribute>}` is interpolated once known and `$${` is a
//! literal `${`. Plain strings are never interpolated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

use super::node::ResourceId;

/// Marker key for attribute references in serialized attribute bags.
pub const REFERENCE_KEY: &str = "$ref";

/// Marker key for interpolated strings in serialized attribute bags.
pub const TEMPLATE_KEY: &str = "$template";

/// Declared attributes of a resource node.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Output attributes reported by a provider after a successful apply.
pub type AppliedAttributes = BTreeMap<String, AttributeValue>;

/// A deferred pointer to another node's output attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeReference {
    /// The referenced node.
    pub resource: ResourceId,
    /// Output attribute name on the referenced node.
    pub attribute: String,
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum AttributeValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number (integer or float).
    Number(serde_json::Number),
    /// String.
    String(String),
    /// Ordered list.
    List(Vec<AttributeValue>),
    /// Nested map, ordered by key.
    Map(BTreeMap<String, AttributeValue>),
    /// Deferred reference to another node's output.
    Reference(AttributeReference),
    /// String interpolating references; becomes a `String` once resolved.
    Template(Vec<TemplatePart>),
}

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    /// Literal text.
    Text(String),
    /// Reference rendered as text once its output is known.
    Reference(AttributeReference),
}

impl AttributeReference {
    /// Creates a reference to `attribute` on `resource`.
    #[must_use]
    pub fn new(resource: impl Into<ResourceId>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    /// Parses `"<resource>.<attribute>"`.
    ///
    /// The split happens at the last dot so resource ids may themselves
    /// contain dots (object keys such as `site/index.html`).
    ///
    /// # Errors
    ///
    /// Returns an error if either side of the dot is empty or there is no dot.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.rsplit_once('.') {
            Some((resource, attribute)) if !resource.is_empty() && !attribute.is_empty() => {
                Ok(Self::new(resource, attribute))
            }
            _ => Err(ConfigError::InvalidReference {
                raw: raw.to_string(),
            }),
        }
    }
}

impl fmt::Display for AttributeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// Splits `raw` into literal text and references.
fn parse_template(raw: &str) -> Result<Vec<TemplatePart>, ConfigError> {
    let invalid = || ConfigError::InvalidReference {
        raw: raw.to_string(),
    };

    let mut parts = Vec::new();
    let mut text = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        let (before, after) = (&rest[..start], &rest[start + 2..]);
        if let Some(literal) = before.strip_suffix('$') {
            text.push_str(literal);
            text.push_str("${");
            rest = after;
            continue;
        }

        text.push_str(before);
        let end = after.find('}').ok_or_else(invalid)?;
        if !text.is_empty() {
            parts.push(TemplatePart::Text(std::mem::take(&mut text)));
        }
        parts.push(TemplatePart::Reference(AttributeReference::parse(&after[..end])?));
        rest = &after[end + 1..];
    }

    text.push_str(rest);
    if !text.is_empty() {
        parts.push(TemplatePart::Text(text));
    }
    Ok(parts)
}

/// Inverse of [`parse_template`].
fn render_template(parts: &[TemplatePart]) -> String {
    parts
        .iter()
        .map(|part| match part {
            TemplatePart::Text(text) => text.replace("${", "$${"),
            TemplatePart::Reference(r) => format!("${{{r}}}"),
        })
        .collect()
}

impl AttributeValue {
    /// Returns the string content if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collects every reference embedded in this value, recursing into lists
    /// and maps. Each reference is paired with its attribute path.
    pub fn collect_references(&self, path: &str, out: &mut Vec<(String, AttributeReference)>) {
        match self {
            Self::Reference(r) => out.push((path.to_string(), r.clone())),
            Self::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Reference(r) = part {
                        out.push((path.to_string(), r.clone()));
                    }
                }
            }
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_references(&format!("{path}[{i}]"), out);
                }
            }
            Self::Map(map) => {
                for (key, value) in map {
                    value.collect_references(&format!("{path}.{key}"), out);
                }
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }

    /// Replaces references whose target output is known.
    ///
    /// References to nodes absent from `outputs` are left in place. Returns
    /// the number of substitutions made.
    pub fn substitute(&mut self, outputs: &BTreeMap<ResourceId, AppliedAttributes>) -> usize {
        match self {
            Self::Reference(r) => {
                let resolved = outputs
                    .get(&r.resource)
                    .and_then(|attrs| attrs.get(&r.attribute))
                    .cloned();
                match resolved {
                    Some(value) => {
                        *self = value;
                        1
                    }
                    None => 0,
                }
            }
            Self::Template(parts) => {
                let mut count = 0;
                for part in parts.iter_mut() {
                    if let TemplatePart::Reference(r) = part
                        && let Some(value) = outputs
                            .get(&r.resource)
                            .and_then(|attrs| attrs.get(&r.attribute))
                    {
                        *part = TemplatePart::Text(value.to_string());
                        count += 1;
                    }
                }

                let resolved: Option<String> = parts
                    .iter()
                    .map(|part| match part {
                        TemplatePart::Text(text) => Some(text.as_str()),
                        TemplatePart::Reference(_) => None,
                    })
                    .collect();
                if let Some(text) = resolved {
                    *self = Self::String(text);
                }
                count
            }
            Self::List(items) => items.iter_mut().map(|item| item.substitute(outputs)).sum(),
            Self::Map(map) => map.values_mut().map(|value| value.substitute(outputs)).sum(),
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => 0,
        }
    }

    /// Returns the first reference still embedded in this value.
    #[must_use]
    pub fn first_unresolved(&self) -> Option<&AttributeReference> {
        match self {
            Self::Reference(r) => Some(r),
            Self::Template(parts) => parts.iter().find_map(|part| match part {
                TemplatePart::Reference(r) => Some(r),
                TemplatePart::Text(_) => None,
            }),
            Self::List(items) => items.iter().find_map(Self::first_unresolved),
            Self::Map(map) => map.values().find_map(Self::first_unresolved),
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => None,
        }
    }
}

impl TryFrom<serde_json::Value> for AttributeValue {
    type Error = ConfigError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                if map.len() == 1
                    && let Some(marker) = map.get(REFERENCE_KEY)
                {
                    let raw = marker.as_str().ok_or_else(|| ConfigError::InvalidReference {
                        raw: marker.to_string(),
                    })?;
                    return Ok(Self::Reference(AttributeReference::parse(raw)?));
                }
                if map.len() == 1
                    && let Some(marker) = map.get(TEMPLATE_KEY)
                {
                    let raw = marker.as_str().ok_or_else(|| ConfigError::InvalidReference {
                        raw: marker.to_string(),
                    })?;
                    return Ok(Self::Template(parse_template(raw)?));
                }
                Self::Map(
                    map.into_iter()
                        .map(|(k, v)| Self::try_from(v).map(|v| (k, v)))
                        .collect::<Result<_, _>>()?,
                )
            }
        })
    }
}

impl From<AttributeValue> for serde_json::Value {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::Null => Self::Null,
            AttributeValue::Bool(b) => Self::Bool(b),
            AttributeValue::Number(n) => Self::Number(n),
            AttributeValue::String(s) => Self::String(s),
            AttributeValue::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            AttributeValue::Map(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
            AttributeValue::Reference(r) => {
                let mut marker = serde_json::Map::new();
                marker.insert(REFERENCE_KEY.to_string(), Self::String(r.to_string()));
                Self::Object(marker)
            }
            AttributeValue::Template(parts) => {
                let mut marker = serde_json::Map::new();
                marker.insert(TEMPLATE_KEY.to_string(), Self::String(render_template(&parts)));
                Self::Object(marker)
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<AttributeReference> for AttributeValue {
    fn from(r: AttributeReference) -> Self {
        Self::Reference(r)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Reference(r) => write!(f, "${{{r}}}"),
            other => write!(f, "{}", serde_json::Value::from(other.clone())),
        }
    }
}
