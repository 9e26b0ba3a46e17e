//! Environment expansion of raw config text, applied before parsing.
//!
//! - `${NAME}` is replaced with the value of `NAME`.
//! - `${NAME:-fallback}` uses `fallback` when `NAME` is unset or empty.
//! - `$${` is a literal `${`.
//!
//! A placeholder that cannot be resolved stays in the text as written, so the
//! parser and validator report it next to the field it belongs to.

/// Result of expanding a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expanded {
    pub text: String,
    /// Names referenced without a value or a fallback, in order of first use.
    pub unresolved: Vec<String>,
}

/// Expand placeholders from the process environment.
pub fn substitute_env(input: &str) -> String {
    expand_env(input).text
}

/// Expand placeholders from the process environment, keeping track of the
/// names that had no value.
pub fn expand_env(input: &str) -> Expanded {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> Expanded {
    let mut text = String::with_capacity(input.len());
    let mut unresolved: Vec<String> = Vec::new();
    let mut rest = input;

    while let Some(at) = rest.find('$') {
        text.push_str(&rest[..at]);
        let tail = &rest[at..];

        if let Some(after) = tail.strip_prefix("$${") {
            text.push_str("${");
            rest = after;
            continue;
        }
        let Some((placeholder, after)) = tail
            .strip_prefix("${")
            .and_then(|body| body.split_once('}'))
        else {
            text.push('$');
            rest = &tail[1..];
            continue;
        };

        let (name, fallback) = match placeholder.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (placeholder, None),
        };
        let value = if is_var_name(name) {
            match (lookup(name), fallback) {
                (Some(v), Some(f)) if v.is_empty() => Some(f.to_string()),
                (Some(v), _) => Some(v),
                (None, f) => f.map(str::to_string),
            }
        } else {
            None
        };

        match value {
            Some(v) => text.push_str(&v),
            None => {
                if is_var_name(name) && !unresolved.iter().any(|n| n == name) {
                    unresolved.push(name.to_string());
                }
                text.push_str(&tail[..placeholder.len() + 3]);
            },
        }
        rest = after;
    }
    text.push_str(rest);

    Expanded { text, unresolved }
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
