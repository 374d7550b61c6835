//! `${VAR}` placeholder expansion for server commands, arguments and environments.
//!
//! Unknown variables are left verbatim so the child process sees exactly what
//! was configured.

use std::borrow::Cow;
use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::warn;

lazy_static! {
    static ref ENV_PLACEHOLDER: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Expand placeholders from the process environment.
pub fn expand_env_placeholders(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expand placeholders using `lookup`. Missing variables stay as `${NAME}`.
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let expanded: Cow<'_, str> = ENV_PLACEHOLDER.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                warn!(variable = name, "Environment placeholder not set, leaving as-is");
                caps[0].to_string()
            }
        }
    });
    expanded.into_owned()
}

/// Expand every value of an environment map. Keys are left untouched.
pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}
