//! Рекурсивная регистрация дерева директорий в источнике.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use walkdir::WalkDir;

use super::source::{RegisterOutcome, WatchSource};
use crate::error::MonitorError;

/// Как часто логировать прогресс обхода.
const PROGRESS_LOG_EVERY: usize = 100;

/// Итог одного обхода.
#[derive(Debug, Default)]
pub struct TreeRegistration {
  /// Директории, впервые зарегистрированные этим обходом.
  pub registered: usize,
  /// Директории, которые уже наблюдались.
  pub already_watched: usize,
  /// Неудачные регистрации отдельных директорий (не фатально).
  pub failed: usize,
  /// Пропущенные из-за ошибок доступа записи.
  pub skipped: usize,
  /// Первая структурная ошибка: корень не читается или источник закрыт.
  pub error: Option<MonitorError>,
}

/// Обходит дерево в глубину и регистрирует каждую директорию.
#[derive(Clone)]
pub struct RecursiveRegistrar {
  source: Arc<dyn WatchSource>,
}

impl RecursiveRegistrar {
  pub fn new(source: Arc<dyn WatchSource>) -> Self {
    Self { source }
  }

  /// Зарегистрировать `root` и все вложенные директории.
  ///
  /// Недоступные поддеревья пропускаются, обход продолжается по соседям.
  pub fn register_tree(&self, root: &Path) -> TreeRegistration {
    info!("Recursive watch started: {}", root.display());
    let mut result = TreeRegistration::default();

    for entry in WalkDir::new(root).follow_links(false) {
      let entry = match entry {
        Ok(entry) => entry,
        Err(err) => {
          let path = err.path().unwrap_or(root).to_path_buf();
          if err.depth() == 0 && result.error.is_none() {
            warn!("Cannot walk root {}: {err}", path.display());
            result.error = Some(MonitorError::Walk { path, source: err });
          } else {
            debug!("Access error, skipping {}: {err}", path.display());
            result.skipped += 1;
          }
          continue;
        }
      };

      if !entry.file_type().is_dir() {
        continue;
      }

      match self.source.register(entry.path()) {
        Ok(RegisterOutcome::Added) => {
          result.registered += 1;
          if result.registered % PROGRESS_LOG_EVERY == 0 {
            info!(
              "{} directories watched (latest: {})",
              result.registered,
              entry.path().display()
            );
          }
        }
        Ok(RegisterOutcome::AlreadyWatched) => result.already_watched += 1,
        Err(MonitorError::WatchSourceClosed) => {
          debug!("Watch source closed, abandoning walk of {}", root.display());
          result.error.get_or_insert(MonitorError::WatchSourceClosed);
          break;
        }
        Err(err) => {
          warn!("Failed to watch directory {}: {err}", entry.path().display());
          result.failed += 1;
        }
      }
    }

    info!(
      "Recursive watch ready: {} ({} directories, {} failed, {} skipped)",
      root.display(),
      result.registered,
      result.failed,
      result.skipped
    );
    result
  }
}
