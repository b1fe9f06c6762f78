//! Tool schema generation.
//!
//! [`generate`] is a pure function from a [`ToolSignature`] to the two JSON
//! shapes LLM discovery protocols expect:
//!
//! - [`McpTool`] (schema A): `{name, description, input_schema: {...}}`,
//!   property examples included.
//! - [`FunctionTool`] (schema B): `{type: "function", function: {name,
//!   description, parameters: {...}}}`, no examples.
//!
//! Properties are kept in an [`IndexMap`] so they serialize in declaration
//! order, and the `required` list follows the same order. Output is
//! byte-stable for a given signature.
//!
//! # Example
//!
//! ```rust
//! use basic_dialog_parser::compile;
//!
//! let source = "PARAM city AS STRING LIKE \"London\" DESCRIPTION \"City name\"\n\
//!               DESCRIPTION \"Gets weather\"\n\
//!               TALK city\n";
//! let compiled = compile(source, "weather.bas").unwrap();
//! assert_eq!(compiled.schemas.mcp.input_schema.required, vec!["city"]);
//! assert_eq!(compiled.schemas.function.function.name, "weather");
//! ```

use crate::analysis::ToolSignature;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One property of an input object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub ty: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub example: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub format: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty", default)]
    pub enum_values: Vec<String>,
}

/// The `{type: "object", properties, required}` object both shapes nest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    #[serde(rename = "type")]
    pub ty: String,
    pub properties: IndexMap<String, PropertySchema>,
    pub required: Vec<String>,
}

/// Schema A: MCP tool listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub input_schema: ObjectSchema,
}

/// Schema B: function-calling tool definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub ty: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: ObjectSchema,
}

/// Both generated shapes for one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchemas {
    pub mcp: McpTool,
    pub function: FunctionTool,
}

impl McpTool {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl FunctionTool {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn object_schema(signature: &ToolSignature, with_examples: bool) -> ObjectSchema {
    let properties = signature
        .parameters
        .iter()
        .map(|param| {
            let property = PropertySchema {
                ty: param.ty.json_type().to_string(),
                description: param.description.clone(),
                example: if with_examples {
                    param.example.clone()
                } else {
                    None
                },
                format: param.ty.json_format().map(str::to_string),
                enum_values: param.enum_values.clone(),
            };
            (param.name.clone(), property)
        })
        .collect();

    let required = signature
        .parameters
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.clone())
        .collect();

    ObjectSchema {
        ty: "object".to_string(),
        properties,
        required,
    }
}

/// Generate both schema shapes for a signature.
pub fn generate(signature: &ToolSignature) -> ToolSchemas {
    let description = signature.description.clone().unwrap_or_default();
    ToolSchemas {
        mcp: McpTool {
            name: signature.tool_name.clone(),
            description: description.clone(),
            input_schema: object_schema(signature, true),
        },
        function: FunctionTool {
            ty: "function".to_string(),
            function: FunctionSpec {
                name: signature.tool_name.clone(),
                description,
                parameters: object_schema(signature, false),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ParameterSpec;
    use crate::ast::ParamType;
    use pretty_assertions::assert_eq;

    fn param(name: &str, ty: ParamType) -> ParameterSpec {
        ParameterSpec {
            name: name.to_string(),
            ty,
            example: Some(format!("{}-example", name)),
            description: format!("{} description", name),
            required: true,
            enum_values: Vec::new(),
        }
    }

    fn signature(parameters: Vec<ParameterSpec>) -> ToolSignature {
        ToolSignature {
            tool_name: "demo".to_string(),
            description: Some("Demo tool".to_string()),
            parameters,
            script_path: "demo.bas".to_string(),
        }
    }

    #[test]
    fn test_required_follows_declaration_order() {
        let schemas = generate(&signature(vec![
            param("a", ParamType::String),
            param("b", ParamType::Integer),
            param("c", ParamType::Boolean),
        ]));
        assert_eq!(schemas.mcp.input_schema.required, vec!["a", "b", "c"]);
        assert_eq!(schemas.function.function.parameters.required, vec!["a", "b", "c"]);
        let keys: Vec<_> = schemas.mcp.input_schema.properties.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_zero_parameters() {
        let schemas = generate(&signature(vec![]));
        assert!(schemas.mcp.input_schema.properties.is_empty());
        assert!(schemas.mcp.input_schema.required.is_empty());
        let json: serde_json::Value = serde_json::from_str(&schemas.function.to_json().unwrap()).unwrap();
        assert_eq!(json["function"]["parameters"]["properties"], serde_json::json!({}));
        assert_eq!(json["function"]["parameters"]["required"], serde_json::json!([]));
    }

    #[test]
    fn test_examples_only_in_mcp_shape() {
        let schemas = generate(&signature(vec![param("city", ParamType::String)]));
        assert_eq!(
            schemas.mcp.input_schema.properties["city"].example.as_deref(),
            Some("city-example")
        );
        assert!(schemas.function.function.parameters.properties["city"].example.is_none());
        assert!(!schemas.function.to_json().unwrap().contains("example"));
    }

    #[test]
    fn test_type_and_format_mapping() {
        let schemas = generate(&signature(vec![
            param("when", ParamType::Date),
            param("mail", ParamType::Email),
            param("phone", ParamType::Phone),
            param("amount", ParamType::Number),
        ]));
        let props = &schemas.mcp.input_schema.properties;
        assert_eq!(props["when"].ty, "string");
        assert_eq!(props["when"].format.as_deref(), Some("date"));
        assert_eq!(props["mail"].format.as_deref(), Some("email"));
        assert_eq!(props["phone"].format, None);
        assert_eq!(props["amount"].ty, "number");
    }

    #[test]
    fn test_enum_values_in_both_shapes() {
        let mut size = param("size", ParamType::String);
        size.enum_values = vec!["S".to_string(), "L".to_string()];
        let schemas = generate(&signature(vec![size]));
        assert!(schemas.mcp.to_json().unwrap().contains("\"enum\""));
        assert!(schemas.function.to_json().unwrap().contains("\"enum\""));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let sig = signature(vec![param("x", ParamType::String), param("y", ParamType::Date)]);
        assert_eq!(generate(&sig).mcp.to_json().unwrap(), generate(&sig).mcp.to_json().unwrap());
        assert_eq!(
            generate(&sig).function.to_json().unwrap(),
            generate(&sig).function.to_json().unwrap()
        );
    }
}
