//! Tool trait, registry and argument helpers

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Tool arguments as a JSON object
pub type Arguments = Map<String, Value>;

/// Why a tool call did not produce output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Missing, mistyped or unparseable arguments
    #[error("{0}")]
    InvalidArguments(String),

    /// No tool registered under that name
    #[error("unknown tool")]
    NotFound,

    /// The tool ran and failed
    #[error("{0}")]
    Failed(String),

    /// The tool observed cancellation
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ToolError::InvalidArguments(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed(message.into())
    }
}

/// Result of a tool execution: text for the model, or an error
pub type ToolResult = std::result::Result<String, ToolError>;

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments
    async fn execute(&self, arguments: Arguments, cancel: CancellationToken) -> ToolResult;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a poly_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> poly_ai::Tool {
    poly_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// What the conversation loop dispatches tool calls through
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Definitions sent to the model
    fn list_tools(&self) -> Vec<poly_ai::Tool>;

    /// Run the named tool
    async fn call(&self, name: &str, arguments: Arguments, cancel: CancellationToken)
    -> ToolResult;
}

/// Default registry: a fixed list of tools with cached schema validators
#[derive(Default)]
pub struct Registry {
    tools: Vec<BoxedTool>,
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of tools
    pub fn with_tools(tools: Vec<BoxedTool>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.add(tool);
        }
        registry
    }

    /// Add a tool, replacing any tool with the same name
    pub fn add(&mut self, tool: BoxedTool) {
        self.tools.retain(|t| t.name() != tool.name());
        self.schema_cache.remove(tool.name());
        self.cache_tool_schema(&tool);
        self.tools.push(tool);
    }

    /// Compile and cache the JSON schema validator for a tool.
    fn cache_tool_schema(&mut self, tool: &BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolRegistry for Registry {
    fn list_tools(&self) -> Vec<poly_ai::Tool> {
        self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect()
    }

    async fn call(
        &self,
        name: &str,
        arguments: Arguments,
        cancel: CancellationToken,
    ) -> ToolResult {
        let tool = self.get(name).ok_or(ToolError::NotFound)?;

        if let Some(validator) = self.schema_cache.get(name) {
            let instance = Value::Object(arguments.clone());
            if let Some(err) = validate_with_validator(&instance, validator) {
                return Err(ToolError::InvalidArguments(err));
            }
        }

        tool.execute(arguments, cancel).await
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(args: &Value, validator: &jsonschema::Validator) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

// Argument extraction helpers

/// A required string argument
pub fn required_str<'a>(args: &'a Arguments, key: &str) -> std::result::Result<&'a str, ToolError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ToolError::invalid(format!(
            "'{}' must be a string, got {}",
            key, other
        ))),
        None => Err(ToolError::invalid(format!("'{}' is required", key))),
    }
}

/// An optional string argument
pub fn optional_str<'a>(args: &'a Arguments, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// An optional boolean argument
pub fn optional_bool(args: &Arguments, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}

/// An optional non-negative integer argument; numeric strings are accepted
pub fn optional_u64(args: &Arguments, key: &str) -> Option<u64> {
    match args.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// An optional list of strings
pub fn optional_str_list(args: &Arguments, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
