//! Repository event configuration
//!
//! A repository opts into analyses with a `.shoal.yaml` file at its root:
//!
//! ```yaml
//! global:
//!   ignore:
//!     - third_party/
//! events:
//!   - event: manual
//!     categories: [Lint, WordCount]
//!   - event: default
//!     categories: [Lint]
//! ```
//!
//! An event without its own stanza falls back to the `default` event.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShoalError};

/// Config file name, relative to the repository root
pub const CONFIG_FILENAME: &str = ".shoal.yaml";

/// Event whose categories apply when the requested event has no stanza
pub const DEFAULT_EVENT: &str = "default";

/// Raw contents of a config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoalConfig {
    #[serde(default)]
    pub global: Option<GlobalConfig>,

    #[serde(default)]
    pub events: Vec<EventStanza>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Path prefixes, relative to the repository root, that are never analyzed
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Third-party analyzer images. Informational: shoal does not start them.
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStanza {
    #[serde(default)]
    pub event: Option<String>,

    #[serde(default)]
    pub categories: Vec<String>,
}

/// What a repository wants for one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventConfig {
    pub categories: Vec<String>,
    pub ignore: Vec<String>,
}

impl ShoalConfig {
    /// Parse and validate YAML config content.
    pub fn parse(content: &str) -> Result<Self> {
        let config: ShoalConfig = if content.trim().is_empty() {
            ShoalConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| ShoalError::config(format!("invalid {}: {}", CONFIG_FILENAME, e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Report the first problem found, if any.
    pub fn validate(&self) -> Result<()> {
        if self.events.is_empty() {
            return Err(ShoalError::config("Config file must have an `events` section"));
        }

        for (i, stanza) in self.events.iter().enumerate() {
            let Some(name) = stanza.event.as_deref() else {
                return Err(ShoalError::config(format!(
                    "Event at index {} is missing an event name",
                    i
                )));
            };
            if stanza.categories.is_empty() {
                return Err(ShoalError::config(format!(
                    "Event {:?} must specify at least one category",
                    name
                )));
            }
        }

        for (i, stanza) in self.events.iter().enumerate() {
            let indexes: Vec<String> = self
                .events
                .iter()
                .enumerate()
                .filter(|(_, other)| other.event == stanza.event)
                .map(|(j, _)| j.to_string())
                .collect();
            if indexes.len() > 1 && indexes[0] == i.to_string() {
                return Err(ShoalError::config(format!(
                    "Multiple events with name {:?} (indexes {})",
                    stanza.event.as_deref().unwrap_or_default(),
                    indexes.join(", ")
                )));
            }
        }
        Ok(())
    }

    fn stanza(&self, event: &str) -> Option<&EventStanza> {
        self.events.iter().find(|s| s.event.as_deref() == Some(event))
    }

    /// Categories and ignore prefixes that apply to `event`
    pub fn event_config(&self, event: &str) -> EventConfig {
        let categories = self
            .stanza(event)
            .or_else(|| self.stanza(DEFAULT_EVENT))
            .map(|s| s.categories.clone())
            .unwrap_or_default();
        let ignore = self
            .global
            .as_ref()
            .map(|g| g.ignore.clone())
            .unwrap_or_default();

        EventConfig { categories, ignore }
    }
}

/// Loads repository configuration for the driver
pub trait ConfigSource: Send + Sync {
    /// `Ok(None)` when the repository has no config.
    fn load(&self, repo_root: &Path, event: &str) -> Result<Option<EventConfig>>;
}

/// Reads `<repo_root>/.shoal.yaml`
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConfigSource;

impl ConfigSource for FileConfigSource {
    fn load(&self, repo_root: &Path, event: &str) -> Result<Option<EventConfig>> {
        let path = repo_root.join(CONFIG_FILENAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("loaded config from {}", path.display());
        Ok(Some(ShoalConfig::parse(&content)?.event_config(event)))
    }
}

/// Fixed configuration, independent of the repository
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    pub config: Option<ShoalConfig>,
}

impl ConfigSource for StaticConfigSource {
    fn load(&self, _repo_root: &Path, event: &str) -> Result<Option<EventConfig>> {
        Ok(self.config.as_ref().map(|c| c.event_config(event)))
    }
}
