use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::sync::Mutex;

/// Timestamped logger writing to stdout or to an append-mode log file.
///
/// Debug output is gated on the flag given at construction; there is no
/// process-wide logging state.
pub struct Logger {
    writer: Option<Mutex<BufWriter<File>>>,
    debug: bool,
}

impl Logger {
    pub fn new(log_file: Option<PathBuf>, debug: bool) -> Result<Self> {
        let writer = match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)
                            .with_context(|| format!("failed to create log directory {parent:?}"))?;
                    }
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("failed to open log file {path:?}"))?;
                Some(Mutex::new(BufWriter::new(file)))
            }
            None => None,
        };

        Ok(Self { writer, debug })
    }

    /// Logger without a file, for tests and embedded use.
    pub fn stdout(debug: bool) -> Self {
        Self { writer: None, debug }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        self.write("", message.as_ref()).await;
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        self.write("[ERR] ", message.as_ref()).await;
    }

    pub async fn debug(&self, message: impl AsRef<str>) {
        if self.debug {
            self.write("[DEBUG] ", message.as_ref()).await;
        }
    }

    async fn write(&self, tag: &str, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("{timestamp} {tag}{message}\n");

        match &self.writer {
            Some(writer) => {
                let mut writer = writer.lock().await;
                let _ = writer.write_all(line.as_bytes());
                let _ = writer.flush();
            }
            None => print!("{line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debug_flag_is_carried() {
        let logger = Logger::stdout(false);
        assert!(!logger.debug_enabled());
        logger.debug("suppressed").await;

        let logger = Logger::stdout(true);
        assert!(logger.debug_enabled());
    }

    #[tokio::test]
    async fn log_file_is_created_and_appended() {
        let dir = std::env::temp_dir().join(format!("smtp2tg-log-test-{}", std::process::id()));
        let path = dir.join("smtp2tg.log");
        let logger = Logger::new(Some(path.clone()), true).unwrap();
        logger.info("first line").await;
        logger.debug("second line").await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("first line"));
        assert!(contents.contains("[DEBUG] second line"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
