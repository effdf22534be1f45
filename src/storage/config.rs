use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::calendar::EventType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Unknown time zone: {0}")]
    UnknownTimezone(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub source: SourceConfig,
    pub google: GoogleConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub obfuscation: ObfuscationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub export_path: PathBuf,
    pub timezone: String,
    #[serde(default)]
    pub expand_recurrences: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoogleConfig {
    pub calendar_id: String,
    pub token_cache: PathBuf,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    pub auto_sync_interval_minutes: u32,
    pub sync_past_days: u32,
    pub sync_future_days: u32,
    pub event_types: Vec<EventType>,
    pub include_private: bool,
    pub state_db: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_map: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObfuscationConfig {
    pub title: bool,
    pub content: bool,
    pub location: bool,
    pub replacement_title: String,
    pub private_only: bool,
}

fn default_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gcal-sync")
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn load_or_create() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.source
            .timezone
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(self.source.timezone.clone()))
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = config_dir();

        Self {
            source: SourceConfig {
                export_path: config_dir.join("groupware-export.json"),
                timezone: "UTC".to_string(),
                expand_recurrences: false,
            },
            google: GoogleConfig {
                calendar_id: "primary".to_string(),
                token_cache: config_dir.join("token.json"),
                base_url: default_base_url(),
            },
            sync: SyncConfig::default(),
            obfuscation: ObfuscationConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval_minutes: 15,
            sync_past_days: 30,
            sync_future_days: 365,
            event_types: vec![
                EventType::NormalEvent,
                EventType::Anniversary,
                EventType::AllDayEvent,
                EventType::Meeting,
                EventType::Reminder,
            ],
            include_private: true,
            state_db: config_dir().join("state.db"),
            id_map: None,
        }
    }
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            title: false,
            content: false,
            location: false,
            replacement_title: "Busy".to_string(),
            private_only: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL_CONFIG: &str = r#"
        [source]
        export_path = "/tmp/export.json"
        timezone = "Europe/Berlin"
        expand_recurrences = true

        [google]
        calendar_id = "work@group.calendar.google.com"
        token_cache = "/tmp/token.json"

        [sync]
        auto_sync_interval_minutes = 30
        sync_past_days = 7
        sync_future_days = 90
        event_types = ["Meeting", "AllDayEvent"]
        include_private = false
        state_db = "/tmp/state.db"
        id_map = "/tmp/ids.txt"

        [obfuscation]
        title = true
        content = true
        location = false
        replacement_title = "Blocked"
        private_only = true
    "#;

    #[test]
    fn default_config_has_15_minute_sync_interval() {
        let config = Config::default();
        assert_eq!(config.sync.auto_sync_interval_minutes, 15);
    }

    #[test]
    fn default_config_syncs_every_event_type() {
        let config = Config::default();
        assert_eq!(config.sync.event_types.len(), 5);
        assert!(config.sync.include_private);
    }

    #[test]
    fn default_config_does_not_obfuscate() {
        let config = Config::default();
        assert!(!config.obfuscation.title);
        assert!(!config.obfuscation.content);
        assert!(!config.obfuscation.location);
    }

    #[test]
    fn parse_valid_toml_config() {
        let config = Config::from_toml(FULL_CONFIG).unwrap();

        assert_eq!(config.source.timezone, "Europe/Berlin");
        assert!(config.source.expand_recurrences);
        assert_eq!(config.google.calendar_id, "work@group.calendar.google.com");
        assert_eq!(config.google.base_url, "https://www.googleapis.com/calendar/v3");
        assert_eq!(
            config.sync.event_types,
            vec![EventType::Meeting, EventType::AllDayEvent]
        );
        assert_eq!(config.sync.id_map, Some(PathBuf::from("/tmp/ids.txt")));
        assert_eq!(config.obfuscation.replacement_title, "Blocked");
        assert!(config.obfuscation.private_only);
    }

    #[test]
    fn obfuscation_section_is_optional() {
        let without_obfuscation = FULL_CONFIG
            .split("[obfuscation]")
            .next()
            .unwrap()
            .to_string();

        let config = Config::from_toml(&without_obfuscation).unwrap();

        assert_eq!(config.obfuscation, ObfuscationConfig::default());
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid toml";
        let result = Config::from_toml(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let config = FULL_CONFIG.replace("\"Meeting\", ", "\"Birthday\", ");
        assert!(Config::from_toml(&config).is_err());
    }

    #[test]
    fn timezone_resolves_configured_zone() {
        let config = Config::from_toml(FULL_CONFIG).unwrap();
        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn unknown_timezone_is_reported() {
        let mut config = Config::default();
        config.source.timezone = "Nowhere/Special".to_string();

        assert!(matches!(
            config.timezone(),
            Err(ConfigError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let config = Config::from_toml(FULL_CONFIG).unwrap();

        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
