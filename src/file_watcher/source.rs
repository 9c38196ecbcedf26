//! Источник уведомлений файловой системы поверх `notify`.
//!
//! Каждая директория регистрируется отдельно (`NonRecursive`): рекурсию
//! обеспечивает [`super::RecursiveRegistrar`]. Watcher и множество уже
//! зарегистрированных путей живут под одним mutex, поэтому стартовый обход и
//! живой классификатор сериализуются на одной блокировке.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use super::events::RawNotification;
use crate::error::{MonitorError, Result};

/// Результат регистрации директории.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
  Added,
  /// Путь уже наблюдается; повторная регистрация ничего не делает.
  AlreadyWatched,
}

/// Внешний источник уведомлений: регистрация директорий и закрытие.
///
/// Сами уведомления приходят через [`WatchStreams`], полученные при создании источника.
pub trait WatchSource: Send + Sync {
  /// Начать наблюдение за директорией (без рекурсии). Идемпотентно.
  fn register(&self, dir: &Path) -> Result<RegisterOutcome>;

  /// Забыть путь и всех его потомков (директория удалена).
  fn forget(&self, path: &Path);

  /// Закрыть источник. После этого оба потока закрываются.
  fn close(&self);
}

/// Два неупорядоченных потока источника: уведомления и ошибки.
pub struct WatchStreams {
  pub notifications: Receiver<RawNotification>,
  pub errors: Receiver<notify::Error>,
}

/// Передающая сторона [`WatchStreams`].
#[derive(Clone)]
pub struct WatchSenders {
  pub notifications: Sender<RawNotification>,
  pub errors: Sender<notify::Error>,
}

/// Создать пару каналов для источника.
pub fn watch_channel() -> (WatchSenders, WatchStreams) {
  let (notifications_tx, notifications_rx) = unbounded();
  let (errors_tx, errors_rx) = unbounded();
  (
    WatchSenders {
      notifications: notifications_tx,
      errors: errors_tx,
    },
    WatchStreams {
      notifications: notifications_rx,
      errors: errors_rx,
    },
  )
}

struct SourceState {
  watcher: Option<RecommendedWatcher>,
  registered: HashSet<PathBuf>,
}

/// [`WatchSource`] на базе `notify::RecommendedWatcher`.
pub struct NotifyWatchSource {
  state: Mutex<SourceState>,
}

impl NotifyWatchSource {
  /// Создать watcher. Ошибка здесь фатальна для старта монитора.
  pub fn new() -> Result<(Self, WatchStreams)> {
    let (senders, streams) = watch_channel();

    // Обработчик владеет обоими senders: когда watcher дропается, потоки закрываются.
    let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
      Ok(event) => {
        for raw in RawNotification::from_notify(event) {
          // best-effort send; если receiver уже закрыт, просто игнорируем.
          let _ = senders.notifications.send(raw);
        }
      }
      Err(err) => {
        let _ = senders.errors.send(err);
      }
    })?;

    let source = Self {
      state: Mutex::new(SourceState {
        watcher: Some(watcher),
        registered: HashSet::new(),
      }),
    };
    Ok((source, streams))
  }

  pub fn watched_count(&self) -> usize {
    self.lock().registered.len()
  }

  pub fn is_watched(&self, dir: &Path) -> bool {
    self.lock().registered.contains(dir)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, SourceState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl WatchSource for NotifyWatchSource {
  fn register(&self, dir: &Path) -> Result<RegisterOutcome> {
    let mut state = self.lock();
    if state.registered.contains(dir) {
      return Ok(RegisterOutcome::AlreadyWatched);
    }
    let watcher = state.watcher.as_mut().ok_or(MonitorError::WatchSourceClosed)?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    state.registered.insert(dir.to_path_buf());
    Ok(RegisterOutcome::Added)
  }

  fn forget(&self, path: &Path) {
    let mut state = self.lock();
    let before = state.registered.len();
    state.registered.retain(|p| !p.starts_with(path));
    let forgotten = before - state.registered.len();
    if forgotten > 0 {
      debug!("Forgot {forgotten} watched directories under {}", path.display());
    }
  }

  fn close(&self) {
    let mut state = self.lock();
    if let Some(watcher) = state.watcher.take() {
      drop(watcher);
      info!("Watch source closed ({} directories released)", state.registered.len());
    }
    state.registered.clear();
  }
}
