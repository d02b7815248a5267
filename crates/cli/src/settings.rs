use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "plume";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_USER_ID: i64 = 1;
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_id")]
    pub user_id: i64,
    #[serde(default = "default_conversation_title")]
    pub default_conversation_title: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_id: default_user_id(),
            default_conversation_title: default_conversation_title(),
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if self.base_url.is_empty() {
            self.base_url = default_base_url();
        }

        self.default_conversation_title = self.default_conversation_title.trim().to_string();
        if self.default_conversation_title.is_empty() {
            self.default_conversation_title = default_conversation_title();
        }

        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".plume"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized = settings.normalized();
        self.persist(&normalized)?;
        self.settings.store(Arc::new(normalized));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> Settings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return Settings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(Settings::default())).merge(Json::file(path));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        // Write-then-rename keeps a crash from truncating the settings file.
        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_id() -> i64 {
    DEFAULT_USER_ID
}

fn default_conversation_title() -> String {
    DEFAULT_CONVERSATION_TITLE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_restores_defaults_for_empty_fields() {
        let settings = Settings {
            base_url: "  http://example.com/  ".to_string(),
            user_id: 9,
            default_conversation_title: "   ".to_string(),
        }
        .normalized();

        assert_eq!(settings.base_url, "http://example.com");
        assert_eq!(settings.user_id, 9);
        assert_eq!(
            settings.default_conversation_title,
            DEFAULT_CONVERSATION_TITLE
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(PathBuf::from("/nonexistent/plume/settings.json"));
        let settings = store.settings();

        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.user_id, DEFAULT_USER_ID);
    }
}
