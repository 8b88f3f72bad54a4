use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Definition of a tool the model can call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Function specification
    pub function: FunctionDefinition,
}

impl Tool {
    /// Create a function tool
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: FunctionParameters) -> Self {
        Self {
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Specification of a callable function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Parameter schema
    pub parameters: FunctionParameters,
}

/// JSON-Schema-like description of a function's arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameters {
    /// Schema type, normally `object`
    #[serde(rename = "type")]
    pub kind: String,
    /// Named properties
    #[serde(default)]
    pub properties: IndexMap<String, PropertySchema>,
    /// Names of required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl FunctionParameters {
    /// An object schema with the given properties
    pub fn object(properties: IndexMap<String, PropertySchema>, required: Vec<String>) -> Self {
        Self {
            kind: "object".to_owned(),
            properties,
            required,
        }
    }
}

impl Default for FunctionParameters {
    fn default() -> Self {
        Self::object(IndexMap::new(), Vec::new())
    }
}

/// Schema for a single property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Schema type (`string`, `number`, `integer`, `boolean`, `array`, `object`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    /// Element schema for arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    /// A property of the given type with a description
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: Some(description.into()),
            enum_values: Vec::new(),
            items: None,
        }
    }
}
