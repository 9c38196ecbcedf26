//! Буфер событий между flush'ами.
//!
//! Наружу доступны только атомарные операции; сам контейнер не отдаётся.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::warn;

use crate::file_watcher::FileChangeEvent;

#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Mutex<VecDeque<FileChangeEvent>>,
    capacity: Option<usize>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Буфер с ограничением размера: при переполнении вытесняются самые старые события.
    pub fn with_capacity_limit(capacity: Option<usize>) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    pub fn append(&self, event: FileChangeEvent) {
        let mut events = self.lock();
        events.push_back(event);
        self.evict_oldest(&mut events);
    }

    /// Забрать все события в порядке добавления; буфер остаётся пустым.
    pub fn drain_all(&self) -> Vec<FileChangeEvent> {
        let mut events = self.lock();
        std::mem::take(&mut *events).into()
    }

    /// Вернуть неудачно сохранённый batch в начало буфера (он старше накопленных после него).
    pub fn restore(&self, batch: Vec<FileChangeEvent>) {
        if batch.is_empty() {
            return;
        }
        let mut events = self.lock();
        let newer = std::mem::take(&mut *events);
        let mut merged: VecDeque<FileChangeEvent> = batch.into();
        merged.extend(newer);
        *events = merged;
        self.evict_oldest(&mut events);
    }

    /// Копия текущего содержимого (для отчётов).
    pub fn snapshot(&self) -> Vec<FileChangeEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn evict_oldest(&self, events: &mut VecDeque<FileChangeEvent>) {
        let Some(capacity) = self.capacity else {
            return;
        };
        if events.len() <= capacity {
            return;
        }
        let overflow = events.len() - capacity;
        for evicted in events.drain(..overflow) {
            warn!(
                "Event buffer full ({capacity}), dropping oldest event: {} {}",
                evicted.operation,
                evicted.path.display()
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FileChangeEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
