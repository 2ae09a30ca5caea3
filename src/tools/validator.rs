//! Input Validation Module
//!
//! Pure predicates that decide whether a value may reach a subprocess argv.
//! Every substitution point in the pipeline calls into this module; the
//! `sanitize_*` helpers only strip characters after validation has passed
//! and are never the sole defense.

use lazy_static::lazy_static;
use regex::Regex;
use std::net::IpAddr;
use url::Url;

/// Maximum length of a single argument
pub const MAX_ARGUMENT_LENGTH: usize = 1000;

/// Maximum length of a target string
pub const MAX_TARGET_LENGTH: usize = 500;

/// Maximum length of a substituted value (wordlist path, variable value)
pub const MAX_VALUE_LENGTH: usize = 500;

/// Maximum number of arguments after the tool name
pub const MAX_ARGUMENTS: usize = 50;

const MAX_DNS_NAME_LENGTH: usize = 253;
const MAX_DNS_LABEL_LENGTH: usize = 63;

lazy_static! {
    static ref SHELL_METACHARACTERS: Regex = Regex::new(r"[;&|`$()<>]").expect("valid regex");
    static ref ENCODED_ESCAPE: Regex =
        Regex::new(r"(?i)(%[0-9a-f]{2}|\\x[0-9a-f]{2})").expect("valid regex");
    static ref CONTROL_CHARACTERS: Regex = Regex::new(r"[\x00-\x1f\x7f]").expect("valid regex");
    static ref BLOCKED_EXTENSION: Regex = Regex::new(
        r"(?i)\.(exe|bat|cmd|scr|pif|vbs|ps1|msi|dll|jar|zip|rar|7z|tar|gz|tgz|doc|docx|xls|xlsx|ppt|pptx)$"
    )
    .expect("valid regex");
    static ref TOOL_NAME: Regex = Regex::new(r"^[A-Za-z0-9_/-]+$").expect("valid regex");
    static ref VARIABLE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex");
    static ref ENV_NAME: Regex = Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("valid regex");
    static ref DNS_LABEL: Regex =
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?$").expect("valid regex");
}

/// Error types for input validation
///
/// Messages name the field and the rule that failed. They never echo the
/// rejected value, which may be an attack payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is empty")]
    Empty(String),

    #[error("{field} is {len} characters long (maximum {max})")]
    TooLong {
        field: String,
        len: usize,
        max: usize,
    },

    #[error("{0} contains shell metacharacters")]
    ShellMetacharacter(String),

    #[error("{0} contains directory traversal")]
    DirectoryTraversal(String),

    #[error("{0} contains an encoded escape sequence")]
    EncodedEscape(String),

    #[error("{0} contains control characters")]
    ControlCharacter(String),

    #[error("{0} ends with a blocked file extension")]
    BlockedExtension(String),

    #[error("Target is not an IP address, DNS name or URL with scheme and host")]
    InvalidTarget,

    #[error("Tool name contains characters outside [A-Za-z0-9_/-]")]
    InvalidToolName,

    #[error("Variable name contains characters outside [A-Za-z0-9_]")]
    InvalidVariableName,

    #[error("Argument {0} references {{{{wordlist}}}} but no wordlist is available")]
    MissingWordlist(usize),

    #[error("Command is empty")]
    EmptyCommand,

    #[error("Command has {count} tokens (maximum {max})")]
    TooManyArguments { count: usize, max: usize },
}

impl ValidationError {
    /// Short machine-readable rule name, used as a metrics label
    pub fn rule(&self) -> &'static str {
        match self {
            Self::Empty(_) => "empty",
            Self::TooLong { .. } => "too_long",
            Self::ShellMetacharacter(_) => "shell_metacharacter",
            Self::DirectoryTraversal(_) => "directory_traversal",
            Self::EncodedEscape(_) => "encoded_escape",
            Self::ControlCharacter(_) => "control_character",
            Self::BlockedExtension(_) => "blocked_extension",
            Self::InvalidTarget => "invalid_target",
            Self::InvalidToolName => "invalid_tool_name",
            Self::InvalidVariableName => "invalid_variable_name",
            Self::MissingWordlist(_) => "missing_wordlist",
            Self::EmptyCommand => "empty_command",
            Self::TooManyArguments { .. } => "too_many_arguments",
        }
    }
}

/// Check a value against the dangerous-character class shared by arguments,
/// targets and substituted values
fn check_dangerous(value: &str, field: &str) -> Result<(), ValidationError> {
    if CONTROL_CHARACTERS.is_match(value) {
        return Err(ValidationError::ControlCharacter(field.to_string()));
    }
    if SHELL_METACHARACTERS.is_match(value) {
        return Err(ValidationError::ShellMetacharacter(field.to_string()));
    }
    if value.contains("../") || value.contains("..\\") {
        return Err(ValidationError::DirectoryTraversal(field.to_string()));
    }
    if ENCODED_ESCAPE.is_match(value) {
        return Err(ValidationError::EncodedEscape(field.to_string()));
    }
    Ok(())
}

fn check_length(value: &str, field: &str, max: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty(field.to_string()));
    }
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            len,
            max,
        });
    }
    Ok(())
}

/// Check a single argument, reporting which rule failed
pub fn check_argument(arg: &str, field: &str) -> Result<(), ValidationError> {
    check_length(arg, field, MAX_ARGUMENT_LENGTH)?;
    check_dangerous(arg, field)?;
    if BLOCKED_EXTENSION.is_match(arg) {
        return Err(ValidationError::BlockedExtension(field.to_string()));
    }
    Ok(())
}

/// Returns `true` if the argument is safe to place in an argv array
///
/// Callers must reject the whole command on any `false`.
pub fn validate_argument(arg: &str) -> bool {
    check_argument(arg, "argument").is_ok()
}

/// Check a target, reporting which rule failed
pub fn check_target(target: &str) -> Result<(), ValidationError> {
    check_length(target, "target", MAX_TARGET_LENGTH)?;
    check_dangerous(target, "target")?;

    if target.parse::<IpAddr>().is_ok() || is_dns_name(target) || is_url_with_host(target) {
        Ok(())
    } else {
        Err(ValidationError::InvalidTarget)
    }
}

/// Returns `true` if the target is an IP literal, a DNS name or a URL with
/// both scheme and host
pub fn validate_target(target: &str) -> bool {
    check_target(target).is_ok()
}

/// RFC 1123 host name: dot-separated labels, no leading or trailing hyphen
fn is_dns_name(value: &str) -> bool {
    let name = value.strip_suffix('.').unwrap_or(value);
    if name.is_empty() || name.len() > MAX_DNS_NAME_LENGTH {
        return false;
    }
    name.split('.')
        .all(|label| label.len() <= MAX_DNS_LABEL_LENGTH && DNS_LABEL.is_match(label))
}

fn is_url_with_host(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => !url.scheme().is_empty() && url.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// Check a wordlist path before it is substituted for `{{wordlist}}`
pub fn check_wordlist_path(path: &str) -> Result<(), ValidationError> {
    check_length(path, "wordlist path", MAX_VALUE_LENGTH)?;
    check_dangerous(path, "wordlist path")?;
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(ValidationError::DirectoryTraversal("wordlist path".to_string()));
    }
    Ok(())
}

/// Check a variable value before substitution
///
/// `name` must already have passed [`check_variable_name`].
pub fn check_variable_value(name: &str, value: &str) -> Result<(), ValidationError> {
    let field = format!("variable '{}'", name);
    check_length(value, &field, MAX_VALUE_LENGTH)?;
    check_dangerous(value, &field)
}

/// Check a placeholder variable name (`^[A-Za-z0-9_]+$`)
pub fn check_variable_name(name: &str) -> Result<(), ValidationError> {
    if VARIABLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidVariableName)
    }
}

/// Check an executable name (`^[A-Za-z0-9_/-]+$`)
pub fn check_tool_name(tool: &str) -> Result<(), ValidationError> {
    if TOOL_NAME.is_match(tool) {
        Ok(())
    } else {
        Err(ValidationError::InvalidToolName)
    }
}

/// Returns `true` if the name is a valid environment variable name
pub fn is_valid_env_name(name: &str) -> bool {
    ENV_NAME.is_match(name)
}

/// Final gate run immediately before spawning
///
/// Rejects an empty command, more than `1 + MAX_ARGUMENTS` tokens, or any
/// token that fails [`check_argument`].
pub fn validate_command_safety(command: &[String]) -> Result<(), ValidationError> {
    if command.is_empty() {
        return Err(ValidationError::EmptyCommand);
    }
    if command.len() > MAX_ARGUMENTS + 1 {
        return Err(ValidationError::TooManyArguments {
            count: command.len(),
            max: MAX_ARGUMENTS + 1,
        });
    }
    for (index, token) in command.iter().enumerate() {
        check_argument(token, &format!("command token {}", index))?;
    }
    Ok(())
}

/// Strip control characters and shell metacharacters, then truncate
pub fn sanitize_argument(arg: &str) -> String {
    strip_unsafe(arg, MAX_ARGUMENT_LENGTH)
}

/// Strip control characters and shell metacharacters, trim, then truncate
pub fn sanitize_target(target: &str) -> String {
    strip_unsafe(target.trim(), MAX_TARGET_LENGTH)
}

/// Remove control characters from a value and cap its length
pub fn strip_control_characters(value: &str, max: usize) -> String {
    value.chars().filter(|c| !c.is_control()).take(max).collect()
}

fn strip_unsafe(value: &str, max: usize) -> String {
    value
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, ';' | '&' | '|' | '`' | '$' | '(' | ')' | '<' | '>'))
        .take(max)
        .collect()
}
