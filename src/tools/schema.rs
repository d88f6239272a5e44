// Tool parameter schema - typed AST, JSON-schema emission, validation
#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::brain::ToolDefinition;

/// Primitive parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// One node of a tool's parameter tree.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
    /// Declared properties for object parameters.
    pub properties: Option<BTreeMap<String, Parameter>>,
    /// Item schema for array parameters.
    pub items: Option<Box<Parameter>>,
    /// Open objects forward undeclared properties to the provider.
    pub open: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
            properties: None,
            items: None,
            open: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.required = false;
        self.default = Some(default);
        self
    }

    pub fn with_properties(mut self, properties: Vec<Parameter>) -> Self {
        self.properties = Some(
            properties
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        );
        self
    }

    pub fn with_items(mut self, items: Parameter) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    /// Emit the JSON-schema node for this parameter.
    pub fn to_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".to_string(), json!(self.param_type.as_str()));
        schema.insert("description".to_string(), json!(self.description));

        if let Some(default) = &self.default {
            schema.insert("default".to_string(), default.clone());
        }

        if self.param_type == ParamType::Object {
            if let Some(properties) = &self.properties {
                let props: Map<String, Value> = properties
                    .iter()
                    .map(|(name, param)| (name.clone(), param.to_schema()))
                    .collect();
                let required: Vec<&str> = properties
                    .iter()
                    .filter(|(_, p)| p.required)
                    .map(|(name, _)| name.as_str())
                    .collect();
                schema.insert("properties".to_string(), Value::Object(props));
                schema.insert("required".to_string(), json!(required));
            }
        }

        if self.param_type == ParamType::Array {
            if let Some(items) = &self.items {
                schema.insert("items".to_string(), items.to_schema());
            }
        }

        Value::Object(schema)
    }
}

/// A declared tool: identity, description, and parameter tree.
#[derive(Debug, Clone)]
pub struct Tool {
    /// Stable identifier, unique across the process.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Fed to the model verbatim.
    pub description: String,
    pub parameters: BTreeMap<String, Parameter>,
    /// Optional return schema, informational only.
    pub returns: Option<Parameter>,
}

impl Tool {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            returns: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        self
    }

    pub fn with_returns(mut self, returns: Parameter) -> Self {
        self.returns = Some(returns);
        self
    }

    /// Emit the wire shape the completion service expects.
    pub fn to_wire(&self) -> ToolDefinition {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, param)| (name.clone(), param.to_schema()))
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(name, _)| name.as_str())
            .collect();

        ToolDefinition {
            name: self.id.clone(),
            description: self.description.clone(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Validate args against a tool's parameter tree.
///
/// Returns the normalized argument map: declared defaults filled in for
/// absent optionals, undeclared properties dropped unless the enclosing
/// object is open. Failure messages name the offending field with a dotted
/// path.
pub fn validate_args(tool: &Tool, args: &Value) -> Result<Map<String, Value>, String> {
    let empty = Map::new();
    let provided = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(format!(
                "expected an object of arguments, got {}",
                type_name(other)
            ))
        }
    };

    validate_object(&tool.parameters, provided, false, "")
}

fn validate_object(
    declared: &BTreeMap<String, Parameter>,
    provided: &Map<String, Value>,
    open: bool,
    path: &str,
) -> Result<Map<String, Value>, String> {
    let mut normalized = Map::new();

    for (name, param) in declared {
        let field_path = join_path(path, name);
        match provided.get(name) {
            Some(value) => {
                normalized.insert(name.clone(), validate_value(value, param, &field_path)?);
            }
            None if param.required => {
                return Err(format!("expected parameter `{}`, got nothing", field_path));
            }
            None => {
                if let Some(default) = &param.default {
                    normalized.insert(name.clone(), default.clone());
                }
            }
        }
    }

    if open {
        for (name, value) in provided {
            if !declared.contains_key(name) {
                normalized.insert(name.clone(), value.clone());
            }
        }
    }

    Ok(normalized)
}

fn validate_value(value: &Value, param: &Parameter, path: &str) -> Result<Value, String> {
    match param.param_type {
        ParamType::String => match value {
            Value::String(_) => Ok(value.clone()),
            other => Err(type_error(path, "string", other)),
        },
        ParamType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            other => Err(type_error(path, "integer", other)),
        },
        ParamType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            other => Err(type_error(path, "number", other)),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            other => Err(type_error(path, "boolean", other)),
        },
        ParamType::Object => match value {
            Value::Object(map) => {
                if let Some(properties) = &param.properties {
                    Ok(Value::Object(validate_object(
                        properties, map, param.open, path,
                    )?))
                } else {
                    Ok(value.clone())
                }
            }
            other => Err(type_error(path, "object", other)),
        },
        ParamType::Array => match value {
            Value::Array(elements) => {
                if let Some(items) = &param.items {
                    let mut normalized = Vec::with_capacity(elements.len());
                    for (index, element) in elements.iter().enumerate() {
                        let element_path = format!("{}[{}]", path, index);
                        normalized.push(validate_value(element, items, &element_path)?);
                    }
                    Ok(Value::Array(normalized))
                } else {
                    Ok(value.clone())
                }
            }
            other => Err(type_error(path, "array", other)),
        },
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> String {
    format!(
        "parameter `{}` has invalid type: expected {}, got {}",
        path,
        expected,
        type_name(got)
    )
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
