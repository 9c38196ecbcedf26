//! Конфигурация монитора.
//!
//! Собирается до `Monitor::start` и после передачи в [`crate::Monitor`] не меняется.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MonitorError, Result};

/// Интервал flush по умолчанию.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Файл базы данных по умолчанию (относительно рабочей директории).
pub const DEFAULT_DATABASE_PATH: &str = "monitor.db";

/// Расширения по умолчанию.
pub const DEFAULT_FILE_FILTERS: [&str; 2] = [".exe", ".dll"];

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    interval: Duration,
    devices: Vec<PathBuf>,
    file_filters: Vec<String>,
    database_path: PathBuf,
    max_buffered_events: Option<usize>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            devices: Vec::new(),
            file_filters: DEFAULT_FILE_FILTERS.iter().map(ToString::to_string).collect(),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            max_buffered_events: None,
        }
    }
}

impl MonitorConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Корень файловой системы текущей платформы.
    pub fn default_device() -> PathBuf {
        if cfg!(windows) {
            PathBuf::from("C:\\")
        } else {
            PathBuf::from("/")
        }
    }

    /// Добавить корневую директорию для рекурсивного наблюдения.
    pub fn add_device(mut self, device: impl Into<PathBuf>) -> Self {
        let device = device.into();
        log::info!("Device added: {}", device.display());
        self.devices.push(device);
        self
    }

    /// Заменить набор расширений. Каждое значение нормализуется (см. [`normalize_extension`]).
    pub fn set_file_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for filter in filters {
            if let Some(ext) = normalize_extension(filter.as_ref()) {
                if !normalized.contains(&ext) {
                    normalized.push(ext);
                }
            }
        }
        log::info!("File filters set: {:?}", normalized);
        self.file_filters = normalized;
        self
    }

    pub fn set_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Ограничить размер буфера; при переполнении вытесняются самые старые события.
    pub fn set_max_buffered_events(mut self, max: Option<usize>) -> Self {
        self.max_buffered_events = max;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn devices(&self) -> &[PathBuf] {
        &self.devices
    }

    pub fn file_filters(&self) -> &[String] {
        &self.file_filters
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn max_buffered_events(&self) -> Option<usize> {
        self.max_buffered_events
    }

    /// Проверки, выполняемые при старте.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(MonitorError::InvalidInterval);
        }
        if self.devices.is_empty() {
            return Err(MonitorError::NoDevices);
        }
        Ok(())
    }
}

/// `exe`, ` .EXE ` и `.exe` превращаются в `.exe`. Пустая строка отбрасывается.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "." {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with('.') {
        Some(lower)
    } else {
        Some(format!(".{lower}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval(), Duration::from_secs(5));
        assert!(config.devices().is_empty());
        assert_eq!(config.file_filters(), &[".exe".to_string(), ".dll".to_string()]);
        assert_eq!(config.database_path(), Path::new("monitor.db"));
        assert_eq!(config.max_buffered_events(), None);
    }

    #[test]
    fn test_filters_are_normalized_and_deduplicated() {
        let config = MonitorConfig::default().set_file_filters(["exe", " .DLL ", ".exe", "", "sys"]);
        assert_eq!(
            config.file_filters(),
            &[".exe".to_string(), ".dll".to_string(), ".sys".to_string()]
        );
    }

    #[test]
    fn test_validate_requires_devices() {
        let config = MonitorConfig::default();
        assert!(matches!(config.validate(), Err(MonitorError::NoDevices)));

        let config = config.add_device("/tmp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = MonitorConfig::new(Duration::ZERO).add_device("/tmp");
        assert!(matches!(config.validate(), Err(MonitorError::InvalidInterval)));
    }

    #[test]
    fn test_devices_keep_insertion_order() {
        let config = MonitorConfig::default().add_device("/b").add_device("/a");
        assert_eq!(config.devices(), &[PathBuf::from("/b"), PathBuf::from("/a")]);
    }
}
