//! Периодический flush буфера в хранилище.
//!
//! Состояния: `Idle` (ждём tick) → `Flushing` (batch забран, запись идёт) → `Idle`.
//! После [`FlushScheduler::stop`] состояние `Stopped`.
//!
//! Неудачный batch возвращается в начало буфера и повторяется на следующем tick
//! (без backoff). Финальный flush при остановке делает одну попытку: если она
//! неудачна, batch теряется, потому что следующего tick уже не будет.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use log::{debug, error, info, warn};

use crate::buffer::EventBuffer;
use crate::store::EventStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Flushing,
    Stopped,
}

/// Итог одной попытки flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Буфер был пуст.
    Empty,
    /// Batch записан.
    Persisted(usize),
    /// Запись не удалась, batch возвращён в буфер.
    Restored(usize),
    /// Финальный flush не удался, batch потерян.
    Lost(usize),
}

/// Разделяемое состояние планировщика. Переживает сам [`FlushScheduler`],
/// поэтому `Stopped` можно прочитать после остановки.
#[derive(Clone, Debug)]
pub struct SchedulerStatus(Arc<Mutex<SchedulerState>>);

impl SchedulerStatus {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(SchedulerState::Idle)))
    }

    pub fn get(&self) -> SchedulerState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: SchedulerState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Одна операция flush: drain → batch write → restore при ошибке.
pub struct Flusher {
    buffer: Arc<EventBuffer>,
    store: Arc<dyn EventStore>,
}

impl Flusher {
    pub fn new(buffer: Arc<EventBuffer>, store: Arc<dyn EventStore>) -> Self {
        Self { buffer, store }
    }

    /// Flush на очередном tick.
    pub fn flush(&self) -> FlushOutcome {
        let batch = self.buffer.drain_all();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        match self.store.upsert_batch(&batch) {
            Ok(()) => {
                info!("{count} events saved to store");
                FlushOutcome::Persisted(count)
            }
            Err(err) => {
                warn!("Failed to save {count} events, will retry on next tick: {err}");
                self.buffer.restore(batch);
                FlushOutcome::Restored(count)
            }
        }
    }

    /// Финальный flush при остановке (best-effort).
    pub fn final_flush(&self) -> FlushOutcome {
        let batch = self.buffer.drain_all();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        match self.store.upsert_batch(&batch) {
            Ok(()) => {
                info!("Final flush: {count} events saved to store");
                FlushOutcome::Persisted(count)
            }
            Err(err) => {
                error!("Final flush failed, {count} events lost: {err}");
                FlushOutcome::Lost(count)
            }
        }
    }
}

/// Handle потока, который выполняет flush каждые `interval`.
pub struct FlushScheduler {
    stop_tx: Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    status: SchedulerStatus,
    flusher: Arc<Flusher>,
}

impl FlushScheduler {
    pub fn start(flusher: Flusher, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let status = SchedulerStatus::new();
        let flusher = Arc::new(flusher);

        let thread_status = status.clone();
        let thread_flusher = flusher.clone();
        let join = thread::spawn(move || {
            let ticker = tick(interval);
            info!("Flush scheduler started (interval: {interval:?})");
            loop {
                select! {
                    recv(stop_rx) -> _ => {
                        debug!("Flush scheduler stop requested");
                        break;
                    },
                    recv(ticker) -> _ => {
                        thread_status.set(SchedulerState::Flushing);
                        thread_flusher.flush();
                        thread_status.set(SchedulerState::Idle);
                    },
                }
            }
            info!("Flush scheduler thread finished");
        });

        Self {
            stop_tx,
            join: Some(join),
            status,
            flusher,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.status.get()
    }

    /// Handle состояния, который остаётся читаемым после [`FlushScheduler::stop`].
    pub fn status(&self) -> SchedulerStatus {
        self.status.clone()
    }

    /// Остановить tick'и, дождаться текущего flush и выполнить финальный.
    ///
    /// Таймаута нет: зависшая запись в хранилище блокирует остановку.
    pub fn stop(mut self) -> FlushOutcome {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Flush scheduler thread panicked");
            }
        }
        let outcome = self.flusher.final_flush();
        self.status.set(SchedulerState::Stopped);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MonitorError, Result};
    use crate::file_watcher::{FileChangeEvent, FileOperation, PersistedRecord};
    use crate::store::SqliteEventStore;
    use chrono::{DateTime, Utc};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Хранилище, которое отказывает заданное число раз, затем пишет в SQLite в памяти.
    struct FlakyStore {
        inner: SqliteEventStore,
        failures_left: AtomicUsize,
        batches: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: SqliteEventStore::in_memory().unwrap(),
                failures_left: AtomicUsize::new(failures),
                batches: AtomicUsize::new(0),
            }
        }
    }

    impl EventStore for FlakyStore {
        fn upsert_one(&self, event: &FileChangeEvent) -> Result<()> {
            self.inner.upsert_one(event)
        }

        fn upsert_batch(&self, events: &[FileChangeEvent]) -> Result<()> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(MonitorError::Store(rusqlite::Error::InvalidQuery));
            }
            self.inner.upsert_batch(events)
        }

        fn all_records(&self) -> Result<Vec<PersistedRecord>> {
            self.inner.all_records()
        }

        fn records_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<PersistedRecord>> {
            self.inner.records_between(start, end)
        }

        fn close(&self) -> Result<()> {
            self.inner.close()
        }
    }

    fn event(path: &str, operation: FileOperation) -> FileChangeEvent {
        FileChangeEvent::new(path, operation, ".exe")
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_empty_buffer_is_noop() {
        let store = Arc::new(FlakyStore::new(0));
        let flusher = Flusher::new(Arc::new(EventBuffer::new()), store.clone());
        assert_eq!(flusher.flush(), FlushOutcome::Empty);
        assert_eq!(store.batches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_batch_is_retried_without_loss_or_duplication() {
        let buffer = Arc::new(EventBuffer::new());
        let store = Arc::new(FlakyStore::new(1));
        let flusher = Flusher::new(buffer.clone(), store.clone());

        buffer.append(event("/r/a.exe", FileOperation::Create));
        buffer.append(event("/r/b.exe", FileOperation::Create));
        buffer.append(event("/r/a.exe", FileOperation::Remove));

        assert_eq!(flusher.flush(), FlushOutcome::Restored(3));
        assert_eq!(buffer.len(), 3);
        assert!(store.all_records().unwrap().is_empty());

        buffer.append(event("/r/c.exe", FileOperation::Create));
        // Восстановленный batch идёт раньше новых событий.
        let pending = buffer.snapshot();
        assert_eq!(pending[0].path, PathBuf::from("/r/a.exe"));
        assert_eq!(pending[3].path, PathBuf::from("/r/c.exe"));

        assert_eq!(flusher.flush(), FlushOutcome::Persisted(4));
        assert!(buffer.is_empty());

        let mut records = store.all_records().unwrap();
        records.sort_by(|a, b| a.event.path.cmp(&b.event.path));
        let summary: Vec<_> = records
            .iter()
            .map(|r| (r.event.path.clone(), r.event.operation))
            .collect();
        assert_eq!(
            summary,
            vec![
                (PathBuf::from("/r/a.exe"), FileOperation::Remove),
                (PathBuf::from("/r/b.exe"), FileOperation::Create),
                (PathBuf::from("/r/c.exe"), FileOperation::Create),
            ]
        );
    }

    #[test]
    fn test_final_flush_failure_loses_batch() {
        let buffer = Arc::new(EventBuffer::new());
        let flusher = Flusher::new(buffer.clone(), Arc::new(FlakyStore::new(1)));
        buffer.append(event("/r/a.exe", FileOperation::Create));

        assert_eq!(flusher.final_flush(), FlushOutcome::Lost(1));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_scheduler_flushes_on_tick_and_on_stop() {
        let buffer = Arc::new(EventBuffer::new());
        let store = Arc::new(FlakyStore::new(0));
        let scheduler = FlushScheduler::start(
            Flusher::new(buffer.clone(), store.clone()),
            Duration::from_millis(50),
        );

        buffer.append(event("/r/a.exe", FileOperation::Create));
        let flushed = wait_until(Duration::from_secs(5), || store.all_records().unwrap().len() == 1);
        assert!(flushed, "Scheduler did not flush within timeout");
        assert_ne!(scheduler.state(), SchedulerState::Stopped);

        let status = scheduler.status();
        buffer.append(event("/r/b.exe", FileOperation::Create));
        let outcome = scheduler.stop();
        assert_eq!(status.get(), SchedulerState::Stopped);
        assert!(matches!(outcome, FlushOutcome::Persisted(1) | FlushOutcome::Empty));
        assert_eq!(store.all_records().unwrap().len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_scheduler_retries_on_next_tick() {
        let buffer = Arc::new(EventBuffer::new());
        let store = Arc::new(FlakyStore::new(1));
        let scheduler = FlushScheduler::start(
            Flusher::new(buffer.clone(), store.clone()),
            Duration::from_millis(50),
        );

        buffer.append(event("/r/a.exe", FileOperation::Create));
        let flushed = wait_until(Duration::from_secs(5), || store.all_records().unwrap().len() == 1);
        assert!(flushed, "Scheduler did not retry the failed batch");
        assert!(store.batches.load(Ordering::SeqCst) >= 2);

        assert_eq!(scheduler.stop(), FlushOutcome::Empty);
    }
}
