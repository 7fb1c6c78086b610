use std::{
    collections::HashMap,
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub type EnvMap = HashMap<String, String>;

static VARIABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\?\{([A-Za-z_][A-Za-z0-9_.-]*)\}").expect("variable pattern compiles")
});

/// Replaces `{NAME}` references with values from `env`, falling back to the
/// process environment. `\{NAME}` is kept literally (without the backslash).
pub fn expand_variables(input: &str, env: &EnvMap) -> Result<String> {
    let mut missing = Vec::new();
    let rendered = VARIABLE.replace_all(input, |caps: &Captures<'_>| {
        let whole = &caps[0];
        if let Some(literal) = whole.strip_prefix('\\') {
            return literal.to_string();
        }
        let key = &caps[1];
        match lookup(key, env) {
            Some(value) => value,
            None => {
                missing.push(key.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        bail!("Missing template variable: {}", missing.join(", "));
    }
    Ok(rendered.into_owned())
}

/// Expands an optional config value, treating an empty result as absent.
pub fn expand_optional(input: Option<&str>, env: &EnvMap) -> Result<Option<String>> {
    let Some(raw) = input else {
        return Ok(None);
    };
    let value = expand_variables(raw, env)?;
    Ok(Some(value).filter(|v| !v.trim().is_empty()))
}

fn lookup(key: &str, env: &EnvMap) -> Option<String> {
    env.get(key).cloned().or_else(|| std::env::var(key).ok())
}

pub fn load_env_file(path: &Path, env: &mut EnvMap) -> Result<PathBuf> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading env file {}", path.display()))?;

    for item in dotenvy::from_read_iter(Cursor::new(content)) {
        let (key, value) = item.with_context(|| format!("parsing env file {}", path.display()))?;
        env.insert(key, value);
    }

    tracing::debug!(path = %path.display(), "loaded env file");
    Ok(path.to_path_buf())
}
