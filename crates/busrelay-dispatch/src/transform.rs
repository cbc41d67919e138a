//! Payload transformation and validation.
//!
//! A [`PayloadTransformer`] turns raw payload bytes into a [`Record`]. The
//! record is then checked against the configured discriminator and used to
//! render the business identifier.

use busrelay_core::ValidationSettings;
use serde_json::{Map, Value};
use tracing::warn;

/// A structured message: a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Wrap a JSON object.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// The raw value of `field`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The value of `field` rendered as text.
    ///
    /// Strings are returned as-is, numbers and booleans in their JSON form.
    /// Null, arrays, objects and missing fields yield `None`.
    #[must_use]
    pub fn text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Set `field` to a string value.
    pub fn insert(&mut self, field: &str, value: impl Into<String>) {
        self.0.insert(field.to_owned(), Value::String(value.into()));
    }

    /// Whether `field` is present and not null.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }
}

/// Why a payload could not be transformed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// The payload is JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Turns raw payload bytes into a structured record.
pub trait PayloadTransformer: Send + Sync + std::fmt::Debug {
    /// Transform one payload.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the payload cannot be interpreted.
    fn transform(&self, payload: &[u8]) -> Result<Record, TransformError>;
}

/// Transformer for JSON object payloads.
///
/// When the routing field is missing it is filled with the default routing
/// value, so every transformed record names its destination(s).
#[derive(Debug, Clone)]
pub struct JsonTransformer {
    routing_field: String,
    default_routing: String,
}

impl JsonTransformer {
    /// Create a transformer that fills `routing_field` with `default_routing`.
    pub fn new(routing_field: impl Into<String>, default_routing: impl Into<String>) -> Self {
        Self {
            routing_field: routing_field.into(),
            default_routing: default_routing.into(),
        }
    }
}

impl PayloadTransformer for JsonTransformer {
    fn transform(&self, payload: &[u8]) -> Result<Record, TransformError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| TransformError::InvalidJson(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(TransformError::NotAnObject);
        };
        let mut record = Record::new(fields);
        if !record.contains(&self.routing_field) && !self.default_routing.is_empty() {
            record.insert(&self.routing_field, self.default_routing.clone());
        }
        Ok(record)
    }
}

/// Check the discriminator field of `record`.
///
/// Only a JSON string exactly equal to the expected value passes.
///
/// # Errors
///
/// Returns the value found (if any) when validation fails.
pub fn validate(record: &Record, settings: &ValidationSettings) -> Result<(), Option<String>> {
    match record.get(&settings.field) {
        Some(Value::String(s)) if *s == settings.expected => Ok(()),
        Some(Value::String(s)) => Err(Some(s.clone())),
        Some(other) => Err(Some(other.to_string())),
        None => Err(None),
    }
}

/// A business identifier template such as `{A}{B}-01001-{C}`.
///
/// `{name}` is replaced by the text of field `name`; everything else is
/// copied literally. An unterminated `{` is literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessIdTemplate {
    parts: Vec<TemplatePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Field(String),
}

impl BusinessIdTemplate {
    /// Parse a template.
    #[must_use]
    pub fn parse(template: &str) -> Self {
        let mut parts = Vec::new();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start + 1..].find('}') else {
                break;
            };
            if start > 0 {
                parts.push(TemplatePart::Literal(rest[..start].to_owned()));
            }
            parts.push(TemplatePart::Field(rest[start + 1..start + 1 + len].to_owned()));
            rest = &rest[start + len + 2..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_owned()));
        }
        Self { parts }
    }

    /// Field names referenced by the template, in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            TemplatePart::Field(name) => Some(name.as_str()),
            TemplatePart::Literal(_) => None,
        })
    }

    /// Render the identifier for `record`. Missing fields render empty.
    #[must_use]
    pub fn render(&self, record: &Record) -> String {
        let mut id = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => id.push_str(text),
                TemplatePart::Field(name) => match record.text(name) {
                    Some(value) => id.push_str(&value),
                    None => warn!(field = %name, "Business identifier field missing, rendering empty"),
                },
            }
        }
        id
    }
}
