//! Process-wide import settings.
//!
//! Loaded once from an optional YAML file; every key may be omitted.
//!
//! ```yaml
//! date_input_formats: ["%d/%m/%Y", "%Y/%m/%d"]
//! log_mode: logger
//! extension: csv
//! import_user: cron
//! upload_method: cronjob
//! default_context: imports
//! ```

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    audit::{AuditSink, LoggerSink, ScreenSink},
    coerce::{Coercer, DEFAULT_DATE_INPUT_FORMATS},
    encoding::DEFAULT_EXTENSION,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    #[default]
    Screen,
    Logger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub date_input_formats: Vec<String>,
    pub log_mode: LogMode,
    pub extension: String,
    pub import_user: String,
    pub upload_method: String,
    /// Context for related entities the catalog does not know.
    pub default_context: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            date_input_formats: DEFAULT_DATE_INPUT_FORMATS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            log_mode: LogMode::Screen,
            extension: DEFAULT_EXTENSION.to_string(),
            import_user: "cron".to_string(),
            upload_method: "cronjob".to_string(),
            default_context: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening settings file {path:?}"))?;
        serde_yaml::from_reader(BufReader::new(file)).context("Parsing settings YAML")
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).context("Parsing settings YAML")
    }

    pub fn coercer(&self) -> Coercer {
        Coercer::new(self.date_input_formats.iter().cloned())
    }

    pub fn extension(&self) -> &str {
        self.extension.trim_start_matches('.')
    }

    pub fn sink(&self) -> Box<dyn AuditSink> {
        match self.log_mode {
            LogMode::Screen => Box::new(ScreenSink::stdout()),
            LogMode::Logger => Box::new(LoggerSink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let settings = Settings::from_yaml_str("log_mode: logger\n").unwrap();
        assert_eq!(settings.log_mode, LogMode::Logger);
        assert_eq!(settings.date_input_formats, vec!["%d/%m/%Y", "%Y/%m/%d"]);
        assert_eq!(settings.extension(), "csv");
        assert_eq!(settings.import_user, "cron");
    }

    #[test]
    fn configured_formats_reach_the_coercer() {
        let settings =
            Settings::from_yaml_str("date_input_formats: ['%m/%d/%Y']\nextension: .txt\n").unwrap();
        let coercer = settings.coercer();
        let formats: Vec<&str> = coercer.date_formats().collect();
        assert_eq!(formats, vec!["%m/%d/%Y", "%d-%m-%Y", "%Y-%m-%d"]);
        assert_eq!(settings.extension(), "txt");
    }

    #[test]
    fn unknown_log_mode_is_rejected() {
        assert!(Settings::from_yaml_str("log_mode: syslog\n").is_err());
    }
}
