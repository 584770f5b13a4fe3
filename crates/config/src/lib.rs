//! Agent settings loading and validation for Tandem.
//!
//! Loads an agent definition from a TOML file with environment variable
//! overrides. Validates all settings before an agent is built from them.
//!
//! ```toml
//! name = "helper"
//! model = "fast"
//! temperature = 0.2
//! iterations = 20
//!
//! [approval]
//! auto_approve_tools = ["lookup"]
//!
//! [memory]
//! backend = "forgetful"
//! transcript = "chat.txt"
//!
//! [models]
//! fast = "gpt-4o-mini"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding [`AgentSettings::model`].
pub const MODEL_ENV: &str = "TANDEM_MODEL";

/// Environment variable overriding [`AgentSettings::iterations`].
pub const ITERATIONS_ENV: &str = "TANDEM_ITERATIONS";

/// Largest accepted [`AgentSettings::parallelism`]; use 0 or less for unbounded.
pub const MAX_PARALLELISM: i64 = 1024;

/// The root settings structure for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Model id or an alias from `[models]`
    #[serde(default = "default_model")]
    pub model: String,

    /// Optional system prompt; rendered as a template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Maximum model turns per run
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Concurrent tool calls; 1 is sequential, 0 or less is unbounded
    #[serde(default = "default_parallelism")]
    pub parallelism: i64,

    /// Treat iteration exhaustion as an error instead of returning the last draft
    #[serde(default)]
    pub strict_iterations: bool,

    /// Only accept replies that parse as JSON
    #[serde(default)]
    pub structured_output: bool,

    #[serde(default)]
    pub approval: ApprovalSettings,

    #[serde(default)]
    pub memory: MemorySettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    /// Model aliases: alias → backend model id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub models: BTreeMap<String, String>,
}

fn default_name() -> String {
    "assistant".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_iterations() -> usize {
    120
}
fn default_parallelism() -> i64 {
    5
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSettings {
    /// Approve every tool call without asking
    #[serde(default)]
    pub auto_approve_all: bool,

    /// Approve calls to these tools without asking
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_approve_tools: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    /// Keep everything
    #[default]
    Static,
    /// Start over on every user message
    Forgetful,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySettings {
    #[serde(default)]
    pub backend: MemoryBackend,

    /// Mirror the conversation to this JSONL file and restore from it on start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Append a human-readable transcript here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracerKind {
    #[default]
    None,
    Log,
    Recording,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub tracer: TracerKind,
}

impl AgentSettings {
    /// Load settings from a specific file path.
    ///
    /// A missing file yields defaults. Environment overrides are applied
    /// before validation.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            tracing::info!("No settings file found at {}, using defaults", path.display());
            Self::default()
        };

        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate settings from TOML text (no environment overrides).
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `TANDEM_MODEL` / `TANDEM_ITERATIONS` from `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup(MODEL_ENV) {
            self.model = model;
        }
        if let Some(raw) = lookup(ITERATIONS_ENV) {
            self.iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("{ITERATIONS_ENV} must be a positive integer, got {raw:?}"))
            })?;
        }
        Ok(())
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError("name must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if let Some(p) = self.top_p
            && !(0.0..=1.0).contains(&p)
        {
            return Err(ConfigError::ValidationError(
                "top_p must be between 0.0 and 1.0".into(),
            ));
        }
        if self.iterations == 0 {
            return Err(ConfigError::ValidationError("iterations must be at least 1".into()));
        }
        if self.parallelism > MAX_PARALLELISM {
            return Err(ConfigError::ValidationError(format!(
                "parallelism must be at most {MAX_PARALLELISM} (0 or less means unbounded)"
            )));
        }
        if let Some((alias, _)) = self.models.iter().find(|(_, id)| id.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "model alias {alias:?} maps to an empty model id"
            )));
        }
        Ok(())
    }

    /// The backend model id for the configured model, after alias lookup.
    pub fn resolved_model(&self) -> &str {
        self.models.get(&self.model).map_or(self.model.as_str(), String::as_str)
    }

    /// Render the settings as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            description: String::new(),
            model: default_model(),
            system_prompt: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            iterations: default_iterations(),
            parallelism: default_parallelism(),
            strict_iterations: false,
            structured_output: false,
            approval: ApprovalSettings::default(),
            memory: MemorySettings::default(),
            telemetry: TelemetrySettings::default(),
            models: BTreeMap::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse settings file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Settings validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = AgentSettings::default();
        assert_eq!(settings.iterations, 120);
        assert_eq!(settings.parallelism, 5);
        assert_eq!(settings.memory.backend, MemoryBackend::Static);
        assert_eq!(settings.telemetry.tracer, TracerKind::None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn settings_roundtrip_toml() {
        let mut settings = AgentSettings {
            name: "helper".into(),
            temperature: Some(0.3),
            ..AgentSettings::default()
        };
        settings.models.insert("fast".into(), "gpt-4o-mini".into());
        let toml_str = settings.to_toml().unwrap();
        let parsed: AgentSettings = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn parses_sections() {
        let settings = AgentSettings::from_toml_str(
            r#"
            name = "helper"
            model = "fast"
            parallelism = 0
            strict_iterations = true

            [approval]
            auto_approve_tools = ["lookup"]

            [memory]
            backend = "forgetful"
            transcript = "chat.txt"

            [telemetry]
            tracer = "recording"

            [models]
            fast = "gpt-4o-mini"
            "#,
        )
        .unwrap();
        assert_eq!(settings.name, "helper");
        assert_eq!(settings.resolved_model(), "gpt-4o-mini");
        assert_eq!(settings.parallelism, 0);
        assert!(settings.strict_iterations);
        assert_eq!(settings.approval.auto_approve_tools, vec!["lookup"]);
        assert_eq!(settings.memory.backend, MemoryBackend::Forgetful);
        assert_eq!(settings.memory.transcript, Some(PathBuf::from("chat.txt")));
        assert_eq!(settings.telemetry.tracer, TracerKind::Recording);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let settings = AgentSettings {
            temperature: Some(5.0),
            ..AgentSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn invalid_top_p_and_iterations_rejected() {
        let top_p = AgentSettings {
            top_p: Some(1.5),
            ..AgentSettings::default()
        };
        assert!(top_p.validate().is_err());

        let iterations = AgentSettings {
            iterations: 0,
            ..AgentSettings::default()
        };
        assert!(iterations.validate().is_err());
    }

    #[test]
    fn oversized_parallelism_rejected() {
        let err = AgentSettings::from_toml_str("parallelism = 9223372036854775807\n").unwrap_err();
        assert!(err.to_string().contains("parallelism"));

        let unbounded = AgentSettings::from_toml_str("parallelism = -1\n").unwrap();
        assert_eq!(unbounded.parallelism, -1);
    }

    #[test]
    fn empty_alias_target_rejected() {
        let err = AgentSettings::from_toml_str("[models]\nfast = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("fast"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = AgentSettings::default();
        settings
            .apply_env_overrides(|key| match key {
                MODEL_ENV => Some("claude-sonnet".into()),
                ITERATIONS_ENV => Some("7".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(settings.model, "claude-sonnet");
        assert_eq!(settings.iterations, 7);
    }

    #[test]
    fn bad_iterations_override_is_an_error() {
        let mut settings = AgentSettings::default();
        let err = settings
            .apply_env_overrides(|key| (key == ITERATIONS_ENV).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn missing_settings_file_returns_defaults() {
        let result = AgentSettings::load_from(Path::new("/nonexistent/agent.toml"));
        assert!(result.is_ok());
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "name = \"reader\"\niterations = 3\n").unwrap();
        let settings = AgentSettings::load_from(&path).unwrap();
        assert_eq!(settings.name, "reader");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "name = [unterminated").unwrap();
        let err = AgentSettings::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
