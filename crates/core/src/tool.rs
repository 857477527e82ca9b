//! Tool trait: the abstraction over side-effecting capabilities.
//!
//! Tools are what let the model act on the forge: list repositories,
//! read and write files, query issues. The engine treats every tool as a
//! black box behind this two-method contract and keeps the parameter map
//! opaque; each tool extracts typed values at its own boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{InvalidField, ToolError, ValidationError};
use crate::message::ConversationId;
use crate::provider::ToolDefinition;

/// Parameters of a tool call, as produced by the model.
pub type ToolParams = serde_json::Map<String, serde_json::Value>;

/// Prefix of every persisted tool message whose execution failed.
pub const TOOL_FAILURE_MARKER: &str = "[tool failed] ";

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Whether `value` is compatible with this type.
    ///
    /// Models frequently quote scalars, so numeric and boolean strings are
    /// accepted for the matching scalar types.
    pub fn accepts(self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match (self, value) {
            (Self::String, Value::String(_)) => true,
            (Self::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().is_ok(),
            (Self::Number, Value::Number(_)) => true,
            (Self::Number, Value::String(s)) => s.trim().parse::<f64>().is_ok(),
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::Boolean, Value::String(s)) => matches!(s.trim(), "true" | "false"),
            (Self::Object, Value::Object(_)) => true,
            (Self::Array, Value::Array(_)) => true,
            _ => false,
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Schema entry for one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// Name, description and parameter schema of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Parameters in declaration order.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Provider-native projection: a JSON-schema function definition.
    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                serde_json::json!({
                    "type": p.param_type.as_str(),
                    "description": p.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Human-readable catalogue entry.
    pub fn describe(&self) -> String {
        let mut out = format!("- {}: {}\n", self.name, self.description);
        if self.params.is_empty() {
            out.push_str("  (no parameters)\n");
        }
        for p in &self.params {
            out.push_str(&format!(
                "  - {} ({}, {}): {}\n",
                p.name,
                p.param_type.as_str(),
                if p.required { "required" } else { "optional" },
                p.description
            ));
        }
        out
    }

    /// Check the schema constraints. Collects every problem before failing.
    pub fn validate(&self, params: &ToolParams) -> Result<(), ValidationError> {
        let mut err = ValidationError::new(&self.name);
        for spec in &self.params {
            match params.get(&spec.name) {
                None | Some(serde_json::Value::Null) => {
                    if spec.required {
                        err.missing.push(spec.name.clone());
                    }
                }
                Some(value) if !spec.param_type.accepts(value) => {
                    err.invalid.push(InvalidField {
                        name: spec.name.clone(),
                        expected: spec.param_type.as_str().into(),
                        found: json_type_name(value).into(),
                    });
                }
                Some(_) => {}
            }
        }
        if err.is_empty() { Ok(()) } else { Err(err) }
    }
}

/// Who asked for a tool to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: String,
    pub conversation_id: ConversationId,
}

/// A request to execute a tool, as extracted from a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque call id, when the backend supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments
    #[serde(default)]
    pub params: ToolParams,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, params: ToolParams) -> Self {
        Self {
            id: None,
            name: name.into(),
            params,
        }
    }
}

/// The outcome of one tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    /// Result text on success, error description on failure
    pub output: String,
    pub duration: Duration,
}

impl ToolResult {
    pub fn success(tool_name: &str, output: impl Into<String>, duration: Duration) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output: output.into(),
            duration,
        }
    }

    pub fn failure(tool_name: &str, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            output: error.into(),
            duration,
        }
    }

    /// Content of the persisted `tool` message.
    pub fn to_message_content(&self) -> String {
        if self.success {
            format!("{}: {}", self.tool_name, self.output)
        } else {
            format!("{TOOL_FAILURE_MARKER}{}: {}", self.tool_name, self.output)
        }
    }

    /// Whether a persisted tool message records a failure.
    pub fn is_failure_content(content: &str) -> bool {
        content.starts_with(TOOL_FAILURE_MARKER)
    }
}

/// A discovered entity the conversation may later select.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCandidate {
    /// Working-context key this entity would occupy (e.g. `current_repo_id`)
    pub key: String,
    pub value: serde_json::Value,
    /// How the entity is referred to in prose
    pub label: String,
}

/// Working-context consequences of a successful tool execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolEffects {
    /// Applied to the working context immediately
    pub updates: Vec<(String, serde_json::Value)>,
    /// Remembered for the rest of the turn only
    pub candidates: Vec<EntityCandidate>,
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered once at startup in the
/// [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and parameter schema. Read once at registration.
    fn descriptor(&self) -> ToolDescriptor;

    /// Tool-specific checks beyond the schema (ranges, formats, ...).
    fn validate_params(&self, _params: &ToolParams) -> Result<(), ToolError> {
        Ok(())
    }

    /// Execute the tool and return its textual output.
    async fn execute(
        &self,
        params: &ToolParams,
        caller: &CallerIdentity,
    ) -> Result<String, ToolError>;

    /// Working-context updates implied by a successful execution.
    fn effects(&self, _params: &ToolParams, _output: &str) -> ToolEffects {
        ToolEffects::default()
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Box<dyn Tool>,
}

/// A registry of available tools.
///
/// Built once at startup and then shared read-only (behind an `Arc`), so
/// concurrent lookups need no locking. Iteration follows registration
/// order, which keeps the generated catalogue reproducible.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let descriptor = tool.descriptor();
        if self.index.contains_key(&descriptor.name) {
            return Err(ToolError::DuplicateTool(descriptor.name));
        }
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { descriptor, tool });
        Ok(())
    }

    /// Get a tool and its descriptor by name.
    pub fn get(&self, name: &str) -> Option<(&ToolDescriptor, &dyn Tool)> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .map(|t| (&t.descriptor, t.tool.as_ref()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Validate parameters against the schema, then against the tool's
    /// own checks.
    pub fn validate_params(&self, name: &str, params: &ToolParams) -> Result<(), ToolError> {
        let (descriptor, tool) = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        descriptor.validate(params).map_err(ToolError::Validation)?;
        tool.validate_params(params)
    }

    /// Look up, validate and run a tool. Output is returned verbatim.
    pub async fn execute(
        &self,
        name: &str,
        params: &ToolParams,
        caller: &CallerIdentity,
    ) -> Result<String, ToolError> {
        self.validate_params(name, params)?;
        let (_, tool) = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(params, caller).await
    }

    /// Working-context effects of a successful call to `name`.
    pub fn effects(&self, name: &str, params: &ToolParams, output: &str) -> ToolEffects {
        self.get(name)
            .map(|(_, tool)| tool.effects(params, output))
            .unwrap_or_default()
    }

    /// Deterministic human-readable catalogue, in registration order.
    pub fn describe_all(&self) -> String {
        if self.tools.is_empty() {
            return "No tools are available.\n".into();
        }
        let mut out = String::from("Available tools:\n\n");
        for t in &self.tools {
            out.push_str(&t.descriptor.describe());
        }
        out
    }

    /// Provider-native definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.descriptor.to_definition()).collect()
    }

    /// All registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a string parameter.
pub fn param_str<'a>(params: &'a ToolParams, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Read an integer parameter, accepting quoted integers.
pub fn param_i64(params: &ToolParams, key: &str) -> Option<i64> {
    match params.get(key)? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a boolean parameter, accepting `"true"` / `"false"`.
pub fn param_bool(params: &ToolParams, key: &str) -> Option<bool> {
    match params.get(key)? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("echo", "Echoes back the input")
                .param(ParamSpec::required("text", ParamType::String, "Text to echo"))
                .param(ParamSpec::optional("times", ParamType::Integer, "Repeat count"))
        }

        async fn execute(
            &self,
            params: &ToolParams,
            _caller: &CallerIdentity,
        ) -> Result<String, ToolError> {
            let text = param_str(params, "text").unwrap_or_default();
            let times = param_i64(params, "times").unwrap_or(1).max(1) as usize;
            Ok(text.repeat(times))
        }
    }

    struct PingTool;

    #[async_trait]
    impl Tool for PingTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("ping", "Replies pong")
        }

        async fn execute(&self, _: &ToolParams, _: &CallerIdentity) -> Result<String, ToolError> {
            Ok("pong".into())
        }
    }

    fn caller() -> CallerIdentity {
        CallerIdentity {
            user_id: "u1".into(),
            conversation_id: ConversationId::from("c1"),
        }
    }

    fn params(value: serde_json::Value) -> ToolParams {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let err = registry.register(Box::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn validation_reports_missing_and_invalid_together() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();

        let err = registry
            .validate_params("echo", &params(json!({"times": "many"})))
            .unwrap_err();
        let ToolError::Validation(v) = err else {
            panic!("expected validation error");
        };
        assert_eq!(v.missing, vec!["text".to_string()]);
        assert_eq!(v.invalid.len(), 1);
        assert_eq!(v.invalid[0].name, "times");
    }

    #[test]
    fn quoted_integers_are_accepted() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        assert!(
            registry
                .validate_params("echo", &params(json!({"text": "a", "times": "3"})))
                .is_ok()
        );
    }

    #[test]
    fn describe_all_follows_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(PingTool)).unwrap();
        registry.register(Box::new(EchoTool)).unwrap();
        let text = registry.describe_all();
        let ping = text.find("- ping").unwrap();
        let echo = text.find("- echo").unwrap();
        assert!(ping < echo);
        assert!(text.contains("text (string, required): Text to echo"));
        assert!(text.contains("(no parameters)"));
        assert_eq!(text, registry.describe_all());
        assert_eq!(registry.names(), vec!["ping", "echo"]);
    }

    #[test]
    fn definitions_are_json_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].parameters["required"], json!(["text"]));
        assert_eq!(defs[0].parameters["properties"]["times"]["type"], "integer");
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let out = registry
            .execute("echo", &params(json!({"text": "hi", "times": 2})), &caller())
            .await
            .unwrap();
        assert_eq!(out, "hihi");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("nonexistent", &ToolParams::new(), &caller())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn execute_never_runs_invalid_calls() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let err = registry
            .execute("echo", &ToolParams::new(), &caller())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[test]
    fn result_content_marks_failures() {
        let ok = ToolResult::success("list_repos", "Found 2 repositories", Duration::ZERO);
        let bad = ToolResult::failure("delete_repo", "Tool not found: delete_repo", Duration::ZERO);
        assert_eq!(ok.to_message_content(), "list_repos: Found 2 repositories");
        assert!(!ToolResult::is_failure_content(&ok.to_message_content()));
        assert!(ToolResult::is_failure_content(&bad.to_message_content()));
        assert!(bad.to_message_content().contains("delete_repo"));
    }
}
