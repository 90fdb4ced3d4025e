// config.rs — Project layout and engine settings.
//
// AuthzConfig determines where AgentAuth keeps its state. The
// `for_project()` constructor lays everything out under `.agentauth/` in
// the project root:
//
//   .agentauth/
//     agents.yaml        authored agents
//     policies.yaml      authored policies
//     settings.toml      engine settings (optional)
//     spend/<agent>.json spend counters, rewritten after each commit
//     consents/<id>.json one file per consent
//     audit.jsonl        hash-chained audit log

use std::fs;
use std::path::{Path, PathBuf};

use aa_policy::{DefaultDecision, EngineConfig, DEFAULT_CONSENT_TTL_SECS};
use chrono::{Duration, FixedOffset, Local, Offset};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Where the service reads and writes its state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthzConfig {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub agents_file: PathBuf,
    pub policies_file: PathBuf,
    pub settings_file: PathBuf,
    pub spend_dir: PathBuf,
    pub consents_dir: PathBuf,
    pub audit_log: PathBuf,
}

impl AuthzConfig {
    /// Standard `.agentauth/` layout for a project.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let state_dir = root.join(".agentauth");
        Self {
            project_root: root,
            agents_file: state_dir.join("agents.yaml"),
            policies_file: state_dir.join("policies.yaml"),
            settings_file: state_dir.join("settings.toml"),
            spend_dir: state_dir.join("spend"),
            consents_dir: state_dir.join("consents"),
            audit_log: state_dir.join("audit.jsonl"),
            state_dir,
        }
    }
}

fn default_consent_ttl_secs() -> i64 {
    DEFAULT_CONSENT_TTL_SECS
}

/// Engine behavior, read from `settings.toml`.
///
/// ```toml
/// default_decision = "deny"   # or "allow"
/// consent_ttl_secs = 3600     # 0 = consents never expire
/// utc_offset_minutes = 60     # omit to use the host's local offset
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSettings {
    #[serde(default)]
    pub default_decision: DefaultDecision,
    #[serde(default = "default_consent_ttl_secs")]
    pub consent_ttl_secs: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_decision: DefaultDecision::Deny,
            consent_ttl_secs: DEFAULT_CONSENT_TTL_SECS,
            utc_offset_minutes: None,
        }
    }
}

impl EngineSettings {
    /// Load settings, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.consent_ttl_secs < 0 {
            return Err(ConfigError::Invalid(format!(
                "consent_ttl_secs must be >= 0, got {}",
                self.consent_ttl_secs
            )));
        }
        if let Some(minutes) = self.utc_offset_minutes {
            if minutes.abs() >= 24 * 60 {
                return Err(ConfigError::Invalid(format!(
                    "utc_offset_minutes must be within ±1439, got {}",
                    minutes
                )));
            }
        }
        Ok(())
    }

    /// Offset for spend periods: the configured one, or the host's.
    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .unwrap_or_else(|| Local::now().offset().fix())
    }

    /// Consent lifetime. `None` means consents never expire.
    pub fn consent_ttl(&self) -> Option<Duration> {
        (self.consent_ttl_secs > 0).then(|| Duration::seconds(self.consent_ttl_secs))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_default_decision(self.default_decision)
            .with_utc_offset(self.utc_offset())
    }
}
