//! Declarative parameter schemas.
//!
//! Every data store publishes schemas for its constructor parameters and for
//! the per-call open/write options. Parameters arrive as JSON objects
//! ([`DataParams`]) and are checked before any I/O happens.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{XcubeError, XcubeResult};

/// Parameters passed to stores, openers and writers.
pub type DataParams = serde_json::Map<String, Value>;

/// JSON type accepted by a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Boolean,
    Integer,
    Number,
    Array,
    Object,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Schema of a single property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    /// Accepted types; a value must match one of them.
    pub types: Vec<ParamType>,
    pub nullable: bool,
    pub description: Option<String>,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
}

impl PropertySchema {
    fn of(types: &[ParamType]) -> Self {
        Self {
            types: types.to_vec(),
            nullable: false,
            description: None,
            default: None,
            enum_values: None,
        }
    }

    pub fn string() -> Self {
        Self::of(&[ParamType::String])
    }

    pub fn boolean() -> Self {
        Self::of(&[ParamType::Boolean])
    }

    pub fn integer() -> Self {
        Self::of(&[ParamType::Integer])
    }

    pub fn array() -> Self {
        Self::of(&[ParamType::Array])
    }

    pub fn object() -> Self {
        Self::of(&[ParamType::Object])
    }

    /// A property accepting any of `types`.
    pub fn one_of(types: &[ParamType]) -> Self {
        Self::of(types)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn enum_values(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    fn check(&self, name: &str, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err(format!("parameter \"{}\" must not be null", name))
            };
        }
        if !self.types.iter().any(|t| t.matches(value)) {
            let expected: Vec<_> = self.types.iter().map(ParamType::as_str).collect();
            return Err(format!(
                "parameter \"{}\" must be of type {}, got {}",
                name,
                expected.join(" or "),
                value
            ));
        }
        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                return Err(format!(
                    "parameter \"{}\" must be one of {}, got {}",
                    name,
                    Value::Array(allowed.clone()),
                    value
                ));
            }
        }
        Ok(())
    }

    /// Render as a JSON Schema fragment.
    pub fn to_json(&self) -> Value {
        let mut types: Vec<Value> = self.types.iter().map(|t| json!(t.as_str())).collect();
        if self.nullable {
            types.push(json!("null"));
        }
        let mut schema = serde_json::Map::new();
        schema.insert(
            "type".to_string(),
            if types.len() == 1 {
                types.remove(0)
            } else {
                Value::Array(types)
            },
        );
        if let Some(description) = &self.description {
            schema.insert("description".to_string(), json!(description));
        }
        if let Some(default) = &self.default {
            schema.insert("default".to_string(), default.clone());
        }
        if let Some(values) = &self.enum_values {
            schema.insert("enum".to_string(), Value::Array(values.clone()));
        }
        Value::Object(schema)
    }
}

/// Object schema: named properties, a required subset, and whether unknown
/// keys are tolerated.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamsSchema {
    title: String,
    pub properties: BTreeMap<String, PropertySchema>,
    pub required: BTreeSet<String>,
    pub additional_properties: bool,
}

impl ParamsSchema {
    /// Create an empty schema. `title` names the schema in error messages.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            properties: BTreeMap::new(),
            required: BTreeSet::new(),
            additional_properties: false,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.insert(name.into());
        self
    }

    pub fn allow_additional_properties(mut self) -> Self {
        self.additional_properties = true;
        self
    }

    pub fn property_names(&self) -> BTreeSet<&str> {
        self.properties.keys().map(String::as_str).collect()
    }

    pub fn required_names(&self) -> BTreeSet<&str> {
        self.required.iter().map(String::as_str).collect()
    }

    /// Check `params` for unknown keys, missing required keys and type errors.
    pub fn validate(&self, params: &DataParams) -> XcubeResult<()> {
        for (name, value) in params {
            match self.properties.get(name) {
                Some(property) => property
                    .check(name, value)
                    .map_err(|message| XcubeError::invalid_params(&self.title, message))?,
                None if self.additional_properties => {}
                None => {
                    return Err(XcubeError::invalid_params(
                        &self.title,
                        format!("unknown parameter \"{}\"", name),
                    ))
                }
            }
        }

        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|name| params.get(name.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(XcubeError::invalid_params(
                &self.title,
                format!("missing required parameter(s) {}", missing.join(", ")),
            ));
        }

        Ok(())
    }

    /// Validate `params` and return a copy with defaults filled in.
    pub fn apply_defaults(&self, params: &DataParams) -> XcubeResult<DataParams> {
        self.validate(params)?;
        let mut complete = params.clone();
        for (name, property) in &self.properties {
            if let Some(default) = &property.default {
                complete
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        Ok(complete)
    }

    /// Render as a JSON Schema object.
    pub fn to_json(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, property)| (name.clone(), property.to_json()))
            .collect();
        json!({
            "type": "object",
            "title": self.title,
            "properties": properties,
            "required": self.required,
            "additionalProperties": self.additional_properties,
        })
    }
}

/// Convenience accessors for validated parameters.
pub trait DataParamsExt {
    fn get_str(&self, name: &str) -> Option<&str>;
    fn get_bool(&self, name: &str) -> Option<bool>;
    fn get_string_list(&self, name: &str) -> Vec<String>;
}

impl DataParamsExt for DataParams {
    fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// A string or a list of strings, as a list.
    fn get_string_list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}
