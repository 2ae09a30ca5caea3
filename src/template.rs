//! Template Model
//!
//! A template declares one tool invocation. Multi-tool templates bundle
//! several invocations under shared metadata and are expanded into
//! single-tool templates once, when a batch is prepared.

use crate::tools::{MAX_ARGUMENTS, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS};
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// Sentinel asking the orchestrator to pick a wordlist
pub const AUTO_WORDLIST: &str = "auto";

const MAX_NAME_LENGTH: usize = 100;
const MAX_TOOL_LENGTH: usize = 50;
const MAX_VARIABLE_NAME_LENGTH: usize = 50;
const MAX_VARIABLE_VALUE_LENGTH: usize = 200;

lazy_static! {
    static ref TEMPLATE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid regex");
    static ref TOOL_NAME: Regex = Regex::new(r"^[A-Za-z0-9_/-]+$").expect("valid regex");
    static ref VARIABLE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex");
    static ref ENV_NAME: Regex = Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("valid regex");
}

/// Structural errors in a template declaration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Template name must be 1-{} characters of [A-Za-z0-9_.-]", MAX_NAME_LENGTH)]
    InvalidName,

    #[error("Template '{0}': tool must be 1-{max} characters of [A-Za-z0-9_/-]", max = MAX_TOOL_LENGTH)]
    InvalidTool(String),

    #[error("Template '{0}' needs either args or a preset")]
    MissingCommand(String),

    #[error("Template '{name}' has {count} arguments (maximum {})", MAX_ARGUMENTS)]
    TooManyArguments { name: String, count: usize },

    #[error("Template '{name}': timeout {timeout}s is outside {}-{}s", MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)]
    TimeoutOutOfRange { name: String, timeout: u64 },

    #[error("Template '{0}' declares a variable with an invalid name")]
    InvalidVariableName(String),

    #[error("Template '{name}': value of variable '{variable}' exceeds {} characters", MAX_VARIABLE_VALUE_LENGTH)]
    VariableValueTooLong { name: String, variable: String },

    #[error("Template '{0}' declares an environment variable with an invalid name")]
    InvalidEnvName(String),

    #[error("Multi-tool template '{0}' has no tools")]
    NoTools(String),
}

/// A single-tool template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    pub name: String,
    pub tool: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub variables: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wordlist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wordlist_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    pub requires_sudo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub tags: Vec<String>,
}

impl Template {
    /// Create a template running `tool` with `args`
    pub fn new(name: &str, tool: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tool: tool.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Whether the template asks for an automatically chosen wordlist
    pub fn wants_auto_wordlist(&self) -> bool {
        self.wordlist.as_deref() == Some(AUTO_WORDLIST)
            || self.args.iter().any(|arg| arg == AUTO_WORDLIST)
    }

    /// Check structural invariants
    ///
    /// Security properties of argument values are checked separately when
    /// the command is sanitized.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LENGTH || !TEMPLATE_NAME.is_match(&self.name) {
            return Err(TemplateError::InvalidName);
        }
        let name = || self.name.clone();

        if self.tool.is_empty() || self.tool.len() > MAX_TOOL_LENGTH || !TOOL_NAME.is_match(&self.tool) {
            return Err(TemplateError::InvalidTool(name()));
        }
        if self.args.is_empty() && self.preset.is_none() {
            return Err(TemplateError::MissingCommand(name()));
        }
        if self.args.len() > MAX_ARGUMENTS {
            return Err(TemplateError::TooManyArguments {
                name: name(),
                count: self.args.len(),
            });
        }
        if let Some(timeout) = self.timeout {
            if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout) {
                return Err(TemplateError::TimeoutOutOfRange {
                    name: name(),
                    timeout,
                });
            }
        }
        for (variable, value) in &self.variables {
            if variable.len() > MAX_VARIABLE_NAME_LENGTH || !VARIABLE_NAME.is_match(variable) {
                return Err(TemplateError::InvalidVariableName(name()));
            }
            if value.chars().count() > MAX_VARIABLE_VALUE_LENGTH {
                return Err(TemplateError::VariableValueTooLong {
                    name: name(),
                    variable: variable.clone(),
                });
            }
        }
        if self.env.keys().any(|key| !ENV_NAME.is_match(key)) {
            return Err(TemplateError::InvalidEnvName(name()));
        }
        Ok(())
    }
}

/// One tool inside a multi-tool template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub variables: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wordlist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wordlist_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    pub requires_sudo: bool,
}

/// Several tool invocations sharing metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiToolTemplate {
    pub name: String,
    pub tools: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A template declaration as found in a file
///
/// A declaration with a `tools` array is multi-tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateSpec {
    Multi(MultiToolTemplate),
    Single(Template),
}

impl TemplateSpec {
    /// Name of the declaration
    pub fn name(&self) -> &str {
        match self {
            Self::Multi(multi) => &multi.name,
            Self::Single(single) => &single.name,
        }
    }

    /// Expand into single-tool templates
    ///
    /// Sub-templates are named `<name>_<tool>`; a tool that appears more
    /// than once gets `_2`, `_3`, ... appended.
    pub fn expand(self) -> Result<Vec<Template>, TemplateError> {
        let multi = match self {
            Self::Single(template) => return Ok(vec![template]),
            Self::Multi(multi) => multi,
        };
        if multi.tools.is_empty() {
            return Err(TemplateError::NoTools(multi.name));
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        let expanded: Vec<Template> = multi
            .tools
            .into_iter()
            .map(|invocation| {
                let short = invocation
                    .tool
                    .rsplit('/')
                    .next()
                    .unwrap_or(&invocation.tool)
                    .to_string();
                let count = seen.entry(short.clone()).or_insert(0);
                *count += 1;
                let name = if *count == 1 {
                    format!("{}_{}", multi.name, short)
                } else {
                    format!("{}_{}_{}", multi.name, short, count)
                };

                Template {
                    name,
                    tool: invocation.tool,
                    args: invocation.args,
                    preset: invocation.preset,
                    variables: invocation.variables,
                    env: invocation.env,
                    wordlist: invocation.wordlist,
                    wordlist_hint: invocation.wordlist_hint,
                    timeout: invocation.timeout,
                    requires_sudo: invocation.requires_sudo,
                    description: multi.description.clone(),
                    author: multi.author.clone(),
                    version: multi.version.clone(),
                    tags: multi.tags.clone(),
                }
            })
            .collect();

        debug!(template = %multi.name, count = expanded.len(), "Expanded multi-tool template");
        Ok(expanded)
    }
}

/// Load one template declaration from a `.json` or `.toml` file
pub fn load_template_file(path: &Path) -> Result<TemplateSpec> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read template file: {:?}", path))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON template: {:?}", path)),
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML template: {:?}", path)),
        _ => anyhow::bail!("Unsupported template format (expected .json or .toml): {:?}", path),
    }
}
