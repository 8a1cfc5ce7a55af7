use crate::logging;
use crate::settings::Settings;
use eyre::Result;
use std::{fs, path::Path, path::PathBuf};

const APP_DIR: &str = "legado-reader";
const CONFIG_FILE: &str = "configuration.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    filepath: PathBuf,
}

impl Config {
    pub fn new() -> Result<Self> {
        let prefix = get_app_data_prefix()?;
        Self::load_from(prefix.join(CONFIG_FILE))
    }

    /// Load configuration from a custom path. A missing file is created
    /// with default settings.
    pub fn load_from(filepath: PathBuf) -> Result<Self> {
        if !filepath.exists() {
            let config = Self {
                settings: Settings::default(),
                filepath,
            };
            config.save()?;
            logging::info(format!(
                "Wrote default configuration to {}",
                config.filepath.display()
            ));
            return Ok(config);
        }

        let config_str = fs::read_to_string(&filepath)?;
        let settings = parse_settings(&config_str, &filepath);
        Ok(Self { settings, filepath })
    }

    /// Get the configuration file path
    pub fn filepath(&self) -> &PathBuf {
        &self.filepath
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<()> {
        let config_json = serde_json::json!({
            "Setting": self.settings,
        });

        let config_str = serde_json::to_string_pretty(&config_json)?;

        // Ensure directory exists before writing
        if let Some(parent) = self.filepath.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.filepath, config_str)?;
        Ok(())
    }
}

// Unknown keys are ignored and missing ones take their defaults. A blank
// parameter list keeps the default parameters. A file that does not parse,
// or fails validation, falls back to defaults.
fn parse_settings(config_str: &str, filepath: &Path) -> Settings {
    let user_config = match serde_json::from_str::<serde_json::Value>(config_str) {
        Ok(value) => value,
        Err(err) => {
            logging::warn(format!(
                "Ignoring unreadable configuration {}: {}",
                filepath.display(),
                err
            ));
            return Settings::default();
        }
    };
    let Some(section) = user_config.get("Setting") else {
        return Settings::default();
    };
    let settings = match serde_json::from_value::<Settings>(section.clone()) {
        Ok(settings) => settings,
        Err(err) => {
            logging::warn(format!("Ignoring malformed \"Setting\" section: {err}"));
            return Settings::default();
        }
    };
    if let Err(errors) = settings.validate() {
        for error in &errors {
            logging::warn(format!("Configuration: {}", error.message));
        }
        return Settings::default();
    }
    let mut merged = Settings::default();
    merged.merge(settings);
    merged
}

pub fn get_app_data_prefix() -> Result<PathBuf> {
    if let Some(config_home) = std::env::var_os("XDG_CONFIG_HOME") {
        let path = PathBuf::from(config_home).join(APP_DIR);
        return Ok(path);
    } else if let Some(home) = std::env::var_os("HOME") {
        let path = PathBuf::from(home.clone()).join(".config").join(APP_DIR);
        if path.exists() {
            return Ok(path);
        } else {
            return Ok(PathBuf::from(home).join(format!(".{APP_DIR}")));
        }
    } else if let Some(user_profile) = std::env::var_os("USERPROFILE") {
        return Ok(PathBuf::from(user_profile).join(format!(".{APP_DIR}")));
    }

    Err(eyre::eyre!(
        "Could not determine application data directory"
    ))
}
