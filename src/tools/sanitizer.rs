//! Command Sanitizer
//!
//! Turns a tool name, preset arguments, template arguments and resolved
//! variables into a flat argv array. Every substituted value is validated
//! right before it is written into a token.

use super::validator::{
    check_argument, check_target, check_tool_name, check_variable_name, check_variable_value,
    check_wordlist_path, is_valid_env_name, sanitize_argument, sanitize_target,
    strip_control_characters, ValidationError, MAX_ARGUMENTS,
};
use crate::resolve::chain::ChainVariables;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Maximum length of an environment variable value passed to a child
pub const MAX_ENV_VALUE_LENGTH: usize = 1000;

/// Variables inherited from the current process into every child environment
const SAFE_BASE_ENV: [&str; 3] = ["PATH", "HOME", "USER"];

/// Everything needed to build one sanitized command
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest<'a> {
    /// Executable name
    pub tool: &'a str,

    /// Template arguments, may contain placeholders
    pub args: &'a [String],

    /// Raw target string
    pub target: &'a str,

    /// Resolved wordlist path, if any
    pub wordlist: Option<&'a str>,

    /// Arguments from the resolved preset, placed before `args`
    pub preset_args: &'a [String],

    /// Template-declared variables
    pub variables: &'a BTreeMap<String, String>,

    /// Variables derived from a previous phase; win on key collision
    pub chain_variables: &'a ChainVariables,
}

/// Builds sanitized argv arrays
///
/// Stateless; a single instance may be shared across concurrent tasks.
#[derive(Debug, Clone, Default)]
pub struct CommandSanitizer;

impl CommandSanitizer {
    /// Create a new sanitizer
    pub fn new() -> Self {
        Self
    }

    /// Build `[tool, ...preset_args, ...args]` with placeholders substituted
    ///
    /// # Errors
    ///
    /// Fails on an invalid tool name, target, wordlist, argument, variable
    /// name or variable value. There is no partial result.
    pub fn sanitize_command(
        &self,
        request: &CommandRequest<'_>,
    ) -> Result<Vec<String>, ValidationError> {
        check_tool_name(request.tool)?;

        check_target(request.target)?;
        let target = sanitize_target(request.target);

        let combined: Vec<&String> = request
            .preset_args
            .iter()
            .chain(request.args.iter())
            .collect();

        if combined.len() > MAX_ARGUMENTS {
            return Err(ValidationError::TooManyArguments {
                count: combined.len() + 1,
                max: MAX_ARGUMENTS + 1,
            });
        }
        for (index, arg) in combined.iter().enumerate() {
            check_argument(arg, &format!("argument {}", index + 1))?;
        }

        let wordlist = match request.wordlist {
            Some(path) => {
                check_wordlist_path(path)?;
                Some(path)
            }
            None => None,
        };

        let substitutions = merge_variables(request.variables, request.chain_variables)?;

        let mut command = Vec::with_capacity(combined.len() + 1);
        command.push(request.tool.to_string());

        for (index, arg) in combined.into_iter().enumerate() {
            let mut token = arg.replace("{{target}}", &target);

            if token.contains("{{wordlist}}") {
                match wordlist {
                    Some(path) => token = token.replace("{{wordlist}}", path),
                    None => return Err(ValidationError::MissingWordlist(index + 1)),
                }
            }

            for substitution in &substitutions {
                for placeholder in &substitution.placeholders {
                    if token.contains(placeholder.as_str()) {
                        check_variable_value(&substitution.name, &substitution.value)?;
                        token = token.replace(placeholder.as_str(), &substitution.value);
                    }
                }
            }

            check_argument(&token, &format!("argument {}", index + 1))?;
            command.push(sanitize_argument(&token));
        }

        debug!(
            tool = request.tool,
            tokens = command.len(),
            "Command sanitized"
        );
        Ok(command)
    }
}

struct Substitution {
    name: String,
    value: String,
    placeholders: Vec<String>,
}

/// Merge template variables with chain variables, chain taking precedence
///
/// Chain variables answer to both `{{name}}` and `{{chain.name}}`.
fn merge_variables(
    variables: &BTreeMap<String, String>,
    chain_variables: &ChainVariables,
) -> Result<Vec<Substitution>, ValidationError> {
    let mut merged: BTreeMap<&str, Substitution> = BTreeMap::new();

    for (name, value) in variables {
        check_variable_name(name)?;
        merged.insert(
            name.as_str(),
            Substitution {
                name: name.clone(),
                value: value.clone(),
                placeholders: vec![format!("{{{{{}}}}}", name)],
            },
        );
    }

    for (name, value) in chain_variables.iter() {
        check_variable_name(name)?;
        merged.insert(
            name.as_str(),
            Substitution {
                name: name.clone(),
                value: value.to_string(),
                placeholders: vec![
                    format!("{{{{chain.{}}}}}", name),
                    format!("{{{{{}}}}}", name),
                ],
            },
        );
    }

    Ok(merged.into_values().collect())
}

/// Build the child environment
///
/// Starts from `PATH`, `HOME` and `USER` of the current process and adds
/// caller entries. Entries with an invalid name are dropped, not errored.
pub fn prepare_environment(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut prepared = BTreeMap::new();

    for key in SAFE_BASE_ENV {
        if let Ok(value) = std::env::var(key) {
            prepared.insert(key.to_string(), value);
        }
    }

    for (name, value) in env {
        if !is_valid_env_name(name) {
            warn!("Dropping environment variable with invalid name");
            continue;
        }
        prepared.insert(
            name.clone(),
            strip_control_characters(value, MAX_ENV_VALUE_LENGTH),
        );
    }

    prepared
}
