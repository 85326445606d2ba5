//! Environment variable interpolation for config files.
//!
//! Supported syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`
//!
//! Deployments pass tenant ids, buckets and credentials through the job
//! environment, so unit files are usually templates over these variables.

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?:
                (?P<op>:?-)
                (?P<default>[^}]*)
            )?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("env var pattern is a valid regex")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every problem found, so a user sees all missing variables at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text using the process environment.
pub fn interpolate(input: &str) -> InterpolationResult {
    interpolate_with(input, |name| env::var(name).ok())
}

/// Interpolate using an arbitrary variable lookup.
///
/// Split out from [`interpolate`] so that resolution rules can be exercised
/// without mutating the process environment.
pub fn interpolate_with<F>(input: &str, lookup: F) -> InterpolationResult
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| resolve(caps, &lookup, &mut errors))
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve<F>(caps: &Captures, lookup: &F, errors: &mut Vec<String>) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let matched = &caps[0];
    if matched == "$$" {
        return "$".to_string();
    }

    let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
        return matched.to_string();
    };
    let name = name.as_str();
    let op = caps.name("op").map(|m| m.as_str());
    let default = caps.name("default").map(|m| m.as_str());

    match lookup(name) {
        Some(value) if value.contains('\n') || value.contains('\r') => {
            errors.push(format!(
                "environment variable '{name}' contains newlines, which is not allowed"
            ));
            matched.to_string()
        }
        Some(value) if value.is_empty() && op == Some(":-") => {
            default.unwrap_or_default().to_string()
        }
        Some(value) => value,
        None => match default {
            Some(default) => default.to_string(),
            None => {
                errors.push(format!("environment variable '{name}' is not set"));
                matched.to_string()
            }
        },
    }
}
