//! Preset Resolution
//!
//! Presets are named argument lists, either scoped to a tool (`nmap.quick`)
//! or global (`verbose`). Configuration is loaded once elsewhere and is only
//! ever read here; lookups hand out copies.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Section name holding presets that are not tied to a tool
pub const GLOBAL_SECTION: &str = "global";

const MAX_PRESET_NAME_LENGTH: usize = 100;
const MAX_TOOL_PART_LENGTH: usize = 20;
const MAX_KEY_PART_LENGTH: usize = 50;

lazy_static! {
    static ref PRESET_NAME: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid regex");
}

/// Error types for preset lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresetError {
    #[error("Invalid preset name: {0}")]
    InvalidName(String),

    #[error("No presets defined for tool '{tool}'. Tools with presets: {}", display_list(.available_tools))]
    NoPresetsForTool {
        tool: String,
        available_tools: Vec<String>,
    },

    #[error("Preset '{name}' not found. Available presets: {}", display_list(.available))]
    NotFound {
        name: String,
        available: Vec<String>,
    },
}

fn display_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

/// Preset configuration: `tool -> preset -> args`, plus a `global` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetConfig {
    sections: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PresetConfig {
    /// Create an empty preset configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool-scoped preset
    pub fn with_tool_preset(mut self, tool: &str, name: &str, args: &[&str]) -> Self {
        self.sections
            .entry(tool.to_string())
            .or_default()
            .insert(name.to_string(), args.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Add a global preset
    pub fn with_global_preset(self, name: &str, args: &[&str]) -> Self {
        self.with_tool_preset(GLOBAL_SECTION, name, args)
    }

    /// Total number of presets across all sections
    pub fn len(&self) -> usize {
        self.sections.values().map(BTreeMap::len).sum()
    }

    /// Whether no presets are configured
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves preset identifiers to argument lists
#[derive(Debug, Clone, Default)]
pub struct PresetResolver {
    config: PresetConfig,
}

impl PresetResolver {
    /// Create a resolver over a loaded configuration
    pub fn new(config: PresetConfig) -> Self {
        Self { config }
    }

    /// Resolve `tool.key` or a bare global name to a fresh copy of its arguments
    ///
    /// Tool-scoped presets are searched first, then global ones.
    ///
    /// # Errors
    ///
    /// Fails on a malformed name, when the tool has no presets at all, or
    /// when the specific name is missing. The latter two list alternatives.
    pub fn resolve_preset(&self, name: &str) -> Result<Vec<String>, PresetError> {
        validate_preset_name(name)?;

        match name.split_once('.') {
            Some((tool, key)) => {
                if let Some(args) = self.tool_section(tool).and_then(|section| section.get(key)) {
                    debug!(preset = name, "Resolved tool-scoped preset");
                    return Ok(args.clone());
                }
                if let Some(args) = self.global_section().and_then(|section| section.get(key)) {
                    debug!(preset = name, "Resolved global preset for tool-scoped name");
                    return Ok(args.clone());
                }
                match self.tool_section(tool) {
                    None => Err(PresetError::NoPresetsForTool {
                        tool: tool.to_string(),
                        available_tools: self.tools_with_presets(),
                    }),
                    Some(_) => Err(PresetError::NotFound {
                        name: name.to_string(),
                        available: self.list_presets_for_tool(tool),
                    }),
                }
            }
            None => match self.global_section().and_then(|section| section.get(name)) {
                Some(args) => {
                    debug!(preset = name, "Resolved global preset");
                    Ok(args.clone())
                }
                None => Err(PresetError::NotFound {
                    name: name.to_string(),
                    available: self.list_global_presets(),
                }),
            },
        }
    }

    /// Like [`resolve_preset`](Self::resolve_preset) but without the diagnostics
    pub fn get_preset(&self, name: &str) -> Option<Vec<String>> {
        self.resolve_preset(name).ok()
    }

    /// Qualified names (`tool.key`) of every preset for a tool
    pub fn list_presets_for_tool(&self, tool: &str) -> Vec<String> {
        self.tool_section(tool)
            .map(|section| section.keys().map(|key| format!("{}.{}", tool, key)).collect())
            .unwrap_or_default()
    }

    /// Names of every global preset
    pub fn list_global_presets(&self) -> Vec<String> {
        self.global_section()
            .map(|section| section.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Tools that have at least one scoped preset
    pub fn tools_with_presets(&self) -> Vec<String> {
        self.config
            .sections
            .iter()
            .filter(|(tool, section)| tool.as_str() != GLOBAL_SECTION && !section.is_empty())
            .map(|(tool, _)| tool.clone())
            .collect()
    }

    fn tool_section(&self, tool: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        if tool == GLOBAL_SECTION {
            return None;
        }
        self.config.sections.get(tool).filter(|section| !section.is_empty())
    }

    fn global_section(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        self.config.sections.get(GLOBAL_SECTION)
    }
}

/// Check a preset identifier's shape
pub fn validate_preset_name(name: &str) -> Result<(), PresetError> {
    if name.is_empty() {
        return Err(PresetError::InvalidName("name is empty".to_string()));
    }
    if name.len() > MAX_PRESET_NAME_LENGTH {
        return Err(PresetError::InvalidName(format!(
            "name exceeds {} characters",
            MAX_PRESET_NAME_LENGTH
        )));
    }
    if !PRESET_NAME.is_match(name) {
        return Err(PresetError::InvalidName(
            "name contains characters outside [A-Za-z0-9_.-]".to_string(),
        ));
    }
    if let Some((tool, key)) = name.split_once('.') {
        if tool.is_empty() || tool.len() > MAX_TOOL_PART_LENGTH {
            return Err(PresetError::InvalidName(format!(
                "tool part must be 1-{} characters",
                MAX_TOOL_PART_LENGTH
            )));
        }
        if key.is_empty() || key.len() > MAX_KEY_PART_LENGTH {
            return Err(PresetError::InvalidName(format!(
                "preset part must be 1-{} characters",
                MAX_KEY_PART_LENGTH
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PresetResolver {
        PresetResolver::new(
            PresetConfig::new()
                .with_tool_preset("nmap", "quick", &["-T4", "-F"])
                .with_tool_preset("nmap", "full", &["-p-", "-sV"])
                .with_tool_preset("gobuster", "dir", &["dir", "-q"])
                .with_global_preset("verbose", &["-v"]),
        )
    }

    #[test]
    fn test_resolve_tool_scoped() {
        assert_eq!(resolver().resolve_preset("nmap.quick").unwrap(), vec!["-T4", "-F"]);
    }

    #[test]
    fn test_resolve_global() {
        assert_eq!(resolver().resolve_preset("verbose").unwrap(), vec!["-v"]);
        assert_eq!(resolver().resolve_preset("nmap.verbose").unwrap(), vec!["-v"]);
    }

    #[test]
    fn test_copy_isolation() {
        let resolver = resolver();
        let mut first = resolver.resolve_preset("nmap.quick").unwrap();
        let mut second = resolver.resolve_preset("nmap.quick").unwrap();

        first.push("--injected".to_string());
        second.clear();

        assert_eq!(resolver.resolve_preset("nmap.quick").unwrap(), vec!["-T4", "-F"]);
    }

    #[test]
    fn test_no_presets_for_tool() {
        let err = resolver().resolve_preset("ffuf.fast").unwrap_err();
        match &err {
            PresetError::NoPresetsForTool { tool, available_tools } => {
                assert_eq!(tool, "ffuf");
                assert_eq!(available_tools, &vec!["gobuster".to_string(), "nmap".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("gobuster, nmap"));
    }

    #[test]
    fn test_preset_not_found_lists_alternatives() {
        let err = resolver().resolve_preset("nmap.stealth").unwrap_err();
        match &err {
            PresetError::NotFound { available, .. } => {
                assert_eq!(available, &vec!["nmap.full".to_string(), "nmap.quick".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("nmap.quick"));

        let err = resolver().resolve_preset("missing").unwrap_err();
        assert!(err.to_string().contains("verbose"));
    }

    #[test]
    fn test_invalid_names() {
        let resolver = resolver();
        assert!(matches!(resolver.resolve_preset(""), Err(PresetError::InvalidName(_))));
        assert!(matches!(resolver.resolve_preset("nmap;quick"), Err(PresetError::InvalidName(_))));
        assert!(matches!(
            resolver.resolve_preset(&"a".repeat(101)),
            Err(PresetError::InvalidName(_))
        ));
        assert!(matches!(
            resolver.resolve_preset(&format!("{}.quick", "t".repeat(21))),
            Err(PresetError::InvalidName(_))
        ));
        assert!(matches!(
            resolver.resolve_preset(&format!("nmap.{}", "k".repeat(51))),
            Err(PresetError::InvalidName(_))
        ));
        assert!(matches!(resolver.resolve_preset(".quick"), Err(PresetError::InvalidName(_))));
    }

    #[test]
    fn test_listing() {
        let resolver = resolver();
        assert_eq!(resolver.list_presets_for_tool("gobuster"), vec!["gobuster.dir"]);
        assert!(resolver.list_presets_for_tool("ffuf").is_empty());
        assert_eq!(resolver.list_global_presets(), vec!["verbose"]);
        assert!(resolver.get_preset("nmap.full").is_some());
        assert!(resolver.get_preset("nmap.none").is_none());
    }

    #[test]
    fn test_deserialize_from_toml() {
        let config: PresetConfig = toml::from_str(
            r#"
[nmap]
quick = ["-T4", "-F"]

[global]
verbose = ["-v"]
"#,
        )
        .unwrap();
        assert_eq!(config.len(), 2);
        let resolver = PresetResolver::new(config);
        assert_eq!(resolver.resolve_preset("nmap.quick").unwrap(), vec!["-T4", "-F"]);
    }
}
