//! Executor configuration: defaults, file loading and environment overrides.
//!
//! Files are TOML or JSON, chosen by extension. Every field may be omitted.
//! Environment variables prefixed `CODEACT_` override whatever the file said.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sandbox::error::{SandboxError, SandboxResult};

pub const DEFAULT_TIMEOUT_SECS: f64 = 50.0;
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 100;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;
/// Deepest call nesting a config may ask for; deeper recursion would outgrow
/// the worker thread's stack.
pub const MAX_CALL_DEPTH_LIMIT: usize = 500;
pub const DEFAULT_MAX_ALLOC_BYTES: usize = 256 * 1024 * 1024;

/// Allow/block lists for the restricted mode.
///
/// `allowed_*: Some(empty)` denies everything on that axis, which is not the
/// same as leaving it unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeExecutionConfig {
    pub safe_mode: bool,
    pub allowed_modules: Option<BTreeSet<String>>,
    pub blocked_modules: Option<BTreeSet<String>>,
    pub allowed_builtins: Option<BTreeSet<String>>,
    pub blocked_builtins: Option<BTreeSet<String>>,
}

impl SafeExecutionConfig {
    /// Safe mode with dynamic evaluation and host access switched off.
    pub fn hardened() -> Self {
        let names = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            safe_mode: true,
            allowed_modules: None,
            blocked_modules: Some(names(&["os", "sys"])),
            allowed_builtins: None,
            blocked_builtins: Some(names(&["eval", "exec", "__import__"])),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub default_timeout_secs: f64,
    /// One namespace for globals and locals, so top-level names persist.
    pub use_same_scope: bool,
    pub cancel_grace_ms: u64,
    pub max_call_depth: usize,
    /// Largest string or list a single script operation may build.
    pub max_alloc_bytes: usize,
    pub safe: SafeExecutionConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            use_same_scope: true,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_alloc_bytes: DEFAULT_MAX_ALLOC_BYTES,
            safe: SafeExecutionConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> SandboxResult<Self> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| SandboxError::Io {
            path: shown.clone(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let config: Self = match extension.as_deref() {
            Some("toml") => toml::from_str(&text).map_err(|e| SandboxError::Parse {
                path: shown.clone(),
                reason: e.to_string(),
            })?,
            Some("json") => serde_json::from_str(&text).map_err(|e| SandboxError::Parse {
                path: shown.clone(),
                reason: e.to_string(),
            })?,
            other => {
                return Err(SandboxError::InvalidConfig(format!(
                    "unsupported config format {:?} for {shown}",
                    other.unwrap_or("")
                )))
            }
        };
        config.validate()?;
        tracing::debug!(path = %shown, "loaded executor config");
        Ok(config)
    }

    /// Apply `CODEACT_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> SandboxResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> SandboxResult<()> {
        if let Some(raw) = lookup("CODEACT_TIMEOUT_SECS") {
            self.default_timeout_secs = parse_env("CODEACT_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("CODEACT_SHARED_SCOPE") {
            self.use_same_scope = parse_bool("CODEACT_SHARED_SCOPE", &raw)?;
        }
        if let Some(raw) = lookup("CODEACT_CANCEL_GRACE_MS") {
            self.cancel_grace_ms = parse_env("CODEACT_CANCEL_GRACE_MS", &raw)?;
        }
        if let Some(raw) = lookup("CODEACT_MAX_CALL_DEPTH") {
            self.max_call_depth = parse_env("CODEACT_MAX_CALL_DEPTH", &raw)?;
        }
        if let Some(raw) = lookup("CODEACT_MAX_ALLOC_BYTES") {
            self.max_alloc_bytes = parse_env("CODEACT_MAX_ALLOC_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("CODEACT_SAFE_MODE") {
            self.safe.safe_mode = parse_bool("CODEACT_SAFE_MODE", &raw)?;
        }
        if let Some(raw) = lookup("CODEACT_ALLOWED_MODULES") {
            self.safe.allowed_modules = Some(parse_list(&raw));
        }
        if let Some(raw) = lookup("CODEACT_BLOCKED_MODULES") {
            self.safe.blocked_modules = Some(parse_list(&raw));
        }
        if let Some(raw) = lookup("CODEACT_ALLOWED_BUILTINS") {
            self.safe.allowed_builtins = Some(parse_list(&raw));
        }
        if let Some(raw) = lookup("CODEACT_BLOCKED_BUILTINS") {
            self.safe.blocked_builtins = Some(parse_list(&raw));
        }
        self.validate()
    }

    pub fn validate(&self) -> SandboxResult<()> {
        let timeout_ok = self.default_timeout_secs > 0.0
            && Duration::try_from_secs_f64(self.default_timeout_secs).is_ok();
        if !timeout_ok {
            return Err(SandboxError::InvalidConfig(format!(
                "default_timeout_secs must be a positive number of seconds a Duration can hold, got {}",
                self.default_timeout_secs
            )));
        }
        if !(1..=MAX_CALL_DEPTH_LIMIT).contains(&self.max_call_depth) {
            return Err(SandboxError::InvalidConfig(format!(
                "max_call_depth must be between 1 and {MAX_CALL_DEPTH_LIMIT}, got {}",
                self.max_call_depth
            )));
        }
        if self.max_alloc_bytes == 0 {
            return Err(SandboxError::InvalidConfig(
                "max_alloc_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured deadline. Out-of-range values, which `validate`
    /// rejects, saturate instead of panicking.
    pub fn default_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.default_timeout_secs).unwrap_or(Duration::MAX)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> SandboxResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| SandboxError::InvalidConfig(format!("{key}: cannot parse {raw:?}")))
}

fn parse_bool(key: &str, raw: &str) -> SandboxResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SandboxError::InvalidConfig(format!(
            "{key}: expected a boolean, got {raw:?}"
        ))),
    }
}

/// Comma-separated names. An empty string is the empty set.
fn parse_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
