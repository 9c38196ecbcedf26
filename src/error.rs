use std::path::PathBuf;

/// Единый тип ошибок монитора.
#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
  #[error("Monitor is already running")]
  AlreadyRunning,

  #[error("Monitor is not running")]
  NotRunning,

  #[error("No devices configured for monitoring")]
  NoDevices,

  #[error("Flush interval must be greater than zero")]
  InvalidInterval,

  #[error("Cannot create store directory {path:?}: {source}")]
  StoreDirectory {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Cannot open store at {path:?}: {source}")]
  StoreOpen {
    path: PathBuf,
    #[source]
    source: rusqlite::Error,
  },

  #[error("Store error: {0}")]
  Store(#[from] rusqlite::Error),

  #[error("Store is closed")]
  StoreClosed,

  #[error("Watch source error: {0}")]
  WatchSource(#[from] notify::Error),

  #[error("Watch source is closed")]
  WatchSourceClosed,

  #[error("Cannot walk {path:?}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

impl MonitorError {
  /// Ошибки, которые прерывают `Monitor::start`. Всё остальное логируется и поглощается.
  pub fn is_fatal_to_start(&self) -> bool {
    matches!(
      self,
      MonitorError::StoreDirectory { .. }
        | MonitorError::StoreOpen { .. }
        | MonitorError::WatchSource(_)
        | MonitorError::AlreadyRunning
        | MonitorError::NoDevices
        | MonitorError::InvalidInterval
    )
  }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
