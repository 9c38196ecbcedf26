//! Контроллер монитора: запуск и остановка конвейера
//! registrar → source → classifier → buffer → scheduler → store.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Local, Utc};
use log::{error, info, warn};

use crate::buffer::EventBuffer;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::file_watcher::{
  EventClassifier, FileChangeEvent, NotifyWatchSource, PersistedRecord, RecursiveRegistrar, TreeRegistration,
  WatchSource,
};
use crate::scheduler::{FlushOutcome, FlushScheduler, Flusher, SchedulerState, SchedulerStatus};
use crate::store::{EventStore, SqliteEventStore};

/// Сколько сохранённых записей показывает [`Monitor::write_stats`].
pub const STATS_MAX_RECORDS: usize = 10;

const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ресурсы запущенного монитора.
struct RunningMonitor {
  source: Arc<NotifyWatchSource>,
  store: Arc<SqliteEventStore>,
  buffer: Arc<EventBuffer>,
  scheduler: FlushScheduler,
  classifier: Option<thread::JoinHandle<()>>,
  sweeps: Vec<thread::JoinHandle<TreeRegistration>>,
}

/// Единственная внешняя точка входа: `start`, `stop` и чтение результатов.
pub struct Monitor {
  config: MonitorConfig,
  running: Option<RunningMonitor>,
  /// Состояние последнего запущенного планировщика; остаётся после `stop`.
  scheduler_status: Option<SchedulerStatus>,
}

impl Monitor {
  pub fn new(config: MonitorConfig) -> Self {
    Self {
      config,
      running: None,
      scheduler_status: None,
    }
  }

  /// Запустить мониторинг.
  ///
  /// Всё или ничего: если хранилище не открылось, уже созданный watcher закрывается.
  /// Не ждёт окончания обхода корней: наблюдение включается по мере регистрации.
  pub fn start(&mut self) -> Result<()> {
    if self.running.is_some() {
      return Err(MonitorError::AlreadyRunning);
    }
    self.config.validate()?;

    let (source, streams) = NotifyWatchSource::new()?;
    let source = Arc::new(source);

    let store = match SqliteEventStore::open(self.config.database_path()) {
      Ok(store) => Arc::new(store),
      Err(err) => {
        error!("Store initialization failed: {err}");
        source.close();
        return Err(err);
      }
    };

    let buffer = Arc::new(EventBuffer::with_capacity_limit(self.config.max_buffered_events()));
    let dyn_source: Arc<dyn WatchSource> = source.clone();

    let sweeps: Vec<thread::JoinHandle<TreeRegistration>> = self
      .config
      .devices()
      .iter()
      .cloned()
      .map(|device| {
        let registrar = RecursiveRegistrar::new(dyn_source.clone());
        thread::spawn(move || {
          info!("Monitoring device {}...", device.display());
          let result = registrar.register_tree(&device);
          if let Some(err) = &result.error {
            warn!("Error while setting up watch for device {}: {err}", device.display());
          }
          result
        })
      })
      .collect();

    let classifier =
      EventClassifier::new(self.config.file_filters().to_vec(), buffer.clone(), dyn_source).spawn(streams);

    let store_for_flush: Arc<dyn EventStore> = store.clone();
    let scheduler = FlushScheduler::start(Flusher::new(buffer.clone(), store_for_flush), self.config.interval());

    self.scheduler_status = Some(scheduler.status());
    self.running = Some(RunningMonitor {
      source,
      store,
      buffer,
      scheduler,
      classifier: Some(classifier),
      sweeps,
    });
    info!("File monitoring started");
    Ok(())
  }

  /// Остановить мониторинг: tick'и, финальный flush, watcher, хранилище.
  ///
  /// Если монитор не запущен, только логирует и возвращает [`MonitorError::NotRunning`].
  pub fn stop(&mut self) -> Result<FlushOutcome> {
    let Some(mut running) = self.running.take() else {
      warn!("Monitor is not running");
      return Err(MonitorError::NotRunning);
    };

    let outcome = running.scheduler.stop();
    running.source.close();
    if let Some(classifier) = running.classifier.take() {
      if classifier.join().is_err() {
        error!("Event classifier thread panicked");
      }
    }
    let dropped = running.buffer.len();
    if dropped > 0 {
      warn!("{dropped} events arrived after the final flush and were not saved");
    }
    if let Err(err) = running.store.close() {
      error!("Failed to close store: {err}");
    }

    info!("File monitoring stopped");
    Ok(outcome)
  }

  /// Дождаться окончания стартовых обходов. Возвращает число зарегистрированных директорий.
  pub fn wait_for_registration(&mut self) -> usize {
    let Some(running) = self.running.as_mut() else {
      return 0;
    };
    let mut total = 0;
    for sweep in running.sweeps.drain(..) {
      match sweep.join() {
        Ok(result) => total += result.registered,
        Err(_) => error!("Registration sweep panicked"),
      }
    }
    total
  }

  pub fn is_running(&self) -> bool {
    self.running.is_some()
  }

  pub fn config(&self) -> &MonitorConfig {
    &self.config
  }

  pub fn devices(&self) -> &[PathBuf] {
    self.config.devices()
  }

  pub fn file_filters(&self) -> &[String] {
    self.config.file_filters()
  }

  /// Состояние планировщика; `None`, если монитор ни разу не запускался.
  pub fn scheduler_state(&self) -> Option<SchedulerState> {
    self.scheduler_status.as_ref().map(SchedulerStatus::get)
  }

  pub fn watched_directories(&self) -> usize {
    self.running.as_ref().map_or(0, |r| r.source.watched_count())
  }

  /// События, ещё не сохранённые в хранилище.
  pub fn pending_events(&self) -> Vec<FileChangeEvent> {
    self.running.as_ref().map(|r| r.buffer.snapshot()).unwrap_or_default()
  }

  /// Все сохранённые записи, от новых к старым.
  pub fn all_records(&self) -> Result<Vec<PersistedRecord>> {
    self.with_store(|store| store.all_records())
  }

  /// Сохранённые записи в диапазоне `[start, end]`, от новых к старым.
  pub fn records_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<PersistedRecord>> {
    self.with_store(|store| store.records_between(start, end))
  }

  /// Вывести события в памяти и последние сохранённые записи.
  pub fn write_stats(&self, out: &mut impl Write) -> io::Result<()> {
    let pending = self.pending_events();
    if pending.is_empty() {
      writeln!(out, "No file events in memory")?;
    } else {
      writeln!(out, "\n===== File events in memory =====")?;
      for event in &pending {
        write_event(out, event)?;
      }
    }

    let records = match self.all_records() {
      Ok(records) => records,
      Err(err) => {
        writeln!(out, "Store query error: {err}")?;
        return Ok(());
      }
    };

    if records.is_empty() {
      writeln!(out, "\nNo file events saved in store")?;
      return Ok(());
    }

    writeln!(out, "\n===== File events in store ({}) =====", records.len())?;
    if records.len() > STATS_MAX_RECORDS {
      writeln!(out, "(showing the latest {STATS_MAX_RECORDS})")?;
    }
    for record in records.iter().take(STATS_MAX_RECORDS) {
      write_event(out, &record.event)?;
    }
    Ok(())
  }

  pub fn print_stats(&self) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(err) = self.write_stats(&mut out) {
      error!("Failed to print stats: {err}");
    }
  }

  /// Живое хранилище, если монитор запущен; иначе база по пути из конфигурации
  /// открывается только для чтения. Если базы ещё нет, результат пустой.
  fn with_store<T: Default>(&self, f: impl FnOnce(&dyn EventStore) -> Result<T>) -> Result<T> {
    if let Some(running) = &self.running {
      return f(running.store.as_ref());
    }
    let Some(store) = SqliteEventStore::open_read_only(self.config.database_path())? else {
      return Ok(T::default());
    };
    let result = f(&store);
    store.close()?;
    result
  }
}

impl Drop for Monitor {
  fn drop(&mut self) {
    if self.running.is_some() {
      let _ = self.stop();
    }
  }
}

fn write_event(out: &mut impl Write, event: &FileChangeEvent) -> io::Result<()> {
  writeln!(
    out,
    "[{}] {}",
    event.timestamp.with_timezone(&Local).format(DISPLAY_TIME_FORMAT),
    event.path.display()
  )?;
  writeln!(out, "  operation: {}, file type: {}", event.operation, event.file_type)?;
  writeln!(out, "----------------------------")
}
