//! Reconciliation settings.
//!
//! Settings are resolved from, in increasing priority:
//! 1. Default values
//! 2. A TOML file (see [`ReconcileConfig::load_from`])
//! 3. `TOLLGATE_*` environment variables (see [`ReconcileConfig::with_env`])
//!
//! ```toml
//! rejection_message = "User denied execution of this tool."
//! stale_approved_after_secs = 600
//! stream_buffer = 64
//! emit_timeout_ms = 250
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::reconcile::{DEFAULT_REJECTION_MESSAGE, SanitizeOptions};

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for a session's reconciliation passes and stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Result synthesized for rejected invocations.
    pub rejection_message: String,
    /// Sanitize away `approved` invocations older than this many seconds.
    ///
    /// Unset keeps them until their executor reports.
    pub stale_approved_after_secs: Option<u64>,
    /// Capacity of the stream writer's buffer, in events.
    pub stream_buffer: usize,
    /// How long an emit may wait on a full buffer, in milliseconds.
    pub emit_timeout_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            rejection_message: DEFAULT_REJECTION_MESSAGE.to_owned(),
            stale_approved_after_secs: None,
            stream_buffer: 64,
            emit_timeout_ms: 250,
        }
    }
}

impl ReconcileConfig {
    /// Parse settings from a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from `path`, falling back to defaults if it is missing.
    pub async fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Merge `TOLLGATE_*` environment variables into the settings.
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    /// Merge overrides from an arbitrary variable lookup.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(message) = lookup("TOLLGATE_REJECTION_MESSAGE") {
            self.rejection_message = message;
        }
        if let Some(raw) = lookup("TOLLGATE_STALE_APPROVED_AFTER_SECS") {
            if raw.trim().is_empty() {
                self.stale_approved_after_secs = None;
            } else if let Some(secs) = parse_var("TOLLGATE_STALE_APPROVED_AFTER_SECS", &raw) {
                self.stale_approved_after_secs = Some(secs);
            }
        }
        if let Some(raw) = lookup("TOLLGATE_STREAM_BUFFER")
            && let Some(buffer) = parse_var("TOLLGATE_STREAM_BUFFER", &raw)
        {
            self.stream_buffer = buffer;
        }
        if let Some(raw) = lookup("TOLLGATE_EMIT_TIMEOUT_MS")
            && let Some(ms) = parse_var("TOLLGATE_EMIT_TIMEOUT_MS", &raw)
        {
            self.emit_timeout_ms = ms;
        }
        self
    }

    /// Validate the settings and return any issues found.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.stream_buffer == 0 {
            issues.push(ConfigIssue::error(
                "stream_buffer",
                "Stream buffer must hold at least one event",
            ));
        }
        if self.emit_timeout_ms == 0 {
            issues.push(ConfigIssue::warning(
                "emit_timeout_ms",
                "Emit timeout is 0, events are dropped whenever the buffer is full",
            ));
        }
        if self.stale_approved_after_secs == Some(0) {
            issues.push(ConfigIssue::warning(
                "stale_approved_after_secs",
                "Every approved invocation will be sanitized away immediately",
            ));
        }
        if self.rejection_message.trim().is_empty() {
            issues.push(ConfigIssue::warning(
                "rejection_message",
                "Rejected invocations will carry an empty result",
            ));
        }

        issues
    }

    /// Check if the settings are usable (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|issue| issue.level != IssueLevel::Error)
    }

    /// Fail on the first error-level issue.
    pub fn ensure_valid(&self) -> ConfigResult<()> {
        match self
            .validate()
            .into_iter()
            .find(|issue| issue.level == IssueLevel::Error)
        {
            Some(issue) => Err(ConfigError::InvalidValue(issue.to_string())),
            None => Ok(()),
        }
    }

    /// Emit timeout as a [`Duration`].
    #[must_use]
    pub const fn emit_timeout(&self) -> Duration {
        Duration::from_millis(self.emit_timeout_ms)
    }

    /// Sanitizer options for a pass starting now.
    #[must_use]
    pub fn sanitize_options(&self) -> SanitizeOptions {
        let options = SanitizeOptions::default();
        match self
            .stale_approved_after_secs
            .and_then(|secs| i64::try_from(secs).ok())
        {
            Some(secs) => options.stale_approved_after(chrono::Duration::seconds(secs)),
            None => options,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = raw, "ignoring unparseable environment override");
            None
        }
    }
}

/// Configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    /// Issue severity level.
    pub level: IssueLevel,
    /// Setting name (e.g., "stream_buffer").
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

impl ConfigIssue {
    /// Create an error-level issue.
    #[must_use]
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a warning-level issue.
    #[must_use]
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            IssueLevel::Error => "ERROR",
            IssueLevel::Warning => "WARN",
        };
        write!(f, "[{}] {}: {}", prefix, self.path, self.message)
    }
}

/// Severity level for configuration issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// The session cannot run with this setting.
    Error,
    /// Likely a mistake.
    Warning,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    use super::*;

    mod parsing {
        use super::*;

        #[test]
        fn empty_document_gives_defaults() {
            assert_eq!(
                ReconcileConfig::from_toml_str("").unwrap(),
                ReconcileConfig::default()
            );
        }

        #[test]
        fn partial_document_keeps_other_defaults() {
            let config = ReconcileConfig::from_toml_str("stale_approved_after_secs = 600").unwrap();
            assert_eq!(config.stale_approved_after_secs, Some(600));
            assert_eq!(config.stream_buffer, 64);
            assert_eq!(config.rejection_message, DEFAULT_REJECTION_MESSAGE);
        }

        #[test]
        fn unknown_key_rejected() {
            let err = ReconcileConfig::from_toml_str("stream_bufer = 3").unwrap_err();
            assert!(matches!(err, ConfigError::TomlParse(_)));
        }
    }

    mod loading {
        use super::*;

        #[tokio::test]
        async fn missing_file_gives_defaults() {
            let dir = TempDir::new().unwrap();
            let config = ReconcileConfig::load_from(dir.path().join("absent.toml"))
                .await
                .unwrap();
            assert_eq!(config, ReconcileConfig::default());
        }

        #[tokio::test]
        async fn reads_file() {
            let dir = TempDir::new().unwrap();
            let file = dir.child("tollgate.toml");
            file.write_str("rejection_message = \"Denied.\"\nemit_timeout_ms = 10\n")
                .unwrap();
            let config = ReconcileConfig::load_from(file.path()).await.unwrap();
            assert_eq!(config.rejection_message, "Denied.");
            assert_eq!(config.emit_timeout(), Duration::from_millis(10));
        }
    }

    mod env {
        use super::*;

        fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
            let map: HashMap<String, String> = pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect();
            move |key| map.get(key).cloned()
        }

        #[test]
        fn overrides_apply() {
            let config = ReconcileConfig::default().with_vars(vars(&[
                ("TOLLGATE_STREAM_BUFFER", "8"),
                ("TOLLGATE_STALE_APPROVED_AFTER_SECS", "30"),
                ("TOLLGATE_REJECTION_MESSAGE", "no"),
            ]));
            assert_eq!(config.stream_buffer, 8);
            assert_eq!(config.stale_approved_after_secs, Some(30));
            assert_eq!(config.rejection_message, "no");
        }

        #[test]
        fn garbage_is_ignored() {
            let config = ReconcileConfig::default()
                .with_vars(vars(&[("TOLLGATE_EMIT_TIMEOUT_MS", "soon")]));
            assert_eq!(config.emit_timeout_ms, 250);
        }

        #[test]
        fn blank_disables_stale_rule() {
            let config = ReconcileConfig {
                stale_approved_after_secs: Some(5),
                ..ReconcileConfig::default()
            }
            .with_vars(vars(&[("TOLLGATE_STALE_APPROVED_AFTER_SECS", "")]));
            assert_eq!(config.stale_approved_after_secs, None);
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn defaults_are_valid() {
            let config = ReconcileConfig::default();
            assert!(config.validate().is_empty());
            config.ensure_valid().unwrap();
        }

        #[test]
        fn zero_buffer_is_an_error() {
            let config = ReconcileConfig {
                stream_buffer: 0,
                ..ReconcileConfig::default()
            };
            assert!(!config.is_valid());
            let err = config.ensure_valid().unwrap_err();
            assert!(err.to_string().contains("stream_buffer"));
        }

        #[test]
        fn zero_timeout_is_a_warning() {
            let config = ReconcileConfig {
                emit_timeout_ms: 0,
                ..ReconcileConfig::default()
            };
            assert!(config.is_valid());
            assert_eq!(config.validate()[0].level, IssueLevel::Warning);
        }

        #[test]
        fn sanitize_options_follow_stale_setting() {
            assert!(ReconcileConfig::default().sanitize_options().stale_approved_after.is_none());
            let config = ReconcileConfig {
                stale_approved_after_secs: Some(90),
                ..ReconcileConfig::default()
            };
            assert_eq!(
                config.sanitize_options().stale_approved_after,
                Some(chrono::Duration::seconds(90))
            );
        }
    }
}
