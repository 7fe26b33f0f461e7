use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Daemon configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub smtp: SmtpSettings,
    pub bot: BotSettings,
    /// Recipient address to Telegram chat id. The `*` entry is the
    /// wildcard route and must be present.
    pub receivers: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    /// Address to listen on, e.g. `0.0.0.0:1025`.
    pub listen: String,
    /// Hostname advertised in the banner and trace headers.
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotSettings {
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// Log file path; stdout when absent.
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub debug: bool,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        let settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {path:?}"))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.smtp.listen.is_empty() {
            bail!("no smtp.listen defined in config");
        }
        if self.smtp.name.is_empty() {
            bail!("no smtp.name defined in config");
        }
        if self.bot.token.is_empty() {
            bail!("no bot.token defined in config");
        }
        match self.receivers.get("*") {
            Some(id) if !id.is_empty() => Ok(()),
            _ => bail!("no wildcard receiver (*) found in config"),
        }
    }
}
