//! Цикл классификации: читает оба потока источника и наполняет буфер.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{never, select, Receiver};
use log::{debug, info, trace, warn};

use super::events::{classify, Classification, FileOperation, RawNotification, RawOperation};
use super::registrar::RecursiveRegistrar;
use super::source::{WatchSource, WatchStreams};
use crate::buffer::EventBuffer;

pub struct EventClassifier {
  filters: Vec<String>,
  buffer: Arc<EventBuffer>,
  source: Arc<dyn WatchSource>,
  registrar: RecursiveRegistrar,
}

impl EventClassifier {
  pub fn new(filters: Vec<String>, buffer: Arc<EventBuffer>, source: Arc<dyn WatchSource>) -> Self {
    let registrar = RecursiveRegistrar::new(source.clone());
    Self {
      filters,
      buffer,
      source,
      registrar,
    }
  }

  /// Запустить цикл в отдельном потоке.
  pub fn spawn(self, streams: WatchStreams) -> thread::JoinHandle<()> {
    thread::spawn(move || self.run(streams))
  }

  /// Блокирующий цикл. Завершается только когда закрыты оба потока.
  pub fn run(&self, streams: WatchStreams) {
    info!("Event classifier started");
    let mut notifications_open = true;
    let mut errors_open = true;

    while notifications_open || errors_open {
      // Закрытый поток заменяется на `never()`, чтобы select! не крутился на нём.
      let notifications: Receiver<RawNotification> = if notifications_open {
        streams.notifications.clone()
      } else {
        never()
      };
      let errors: Receiver<notify::Error> = if errors_open {
        streams.errors.clone()
      } else {
        never()
      };

      select! {
        recv(notifications) -> msg => match msg {
          Ok(raw) => self.handle(&raw),
          Err(_) => {
            debug!("Notification stream closed");
            notifications_open = false;
          }
        },
        recv(errors) -> msg => match msg {
          Ok(err) => warn!("Watch source error: {err}"),
          Err(_) => {
            debug!("Watch error stream closed");
            errors_open = false;
          }
        },
      }
    }

    info!("Event classifier finished");
  }

  /// Обработать одно уведомление.
  pub fn handle(&self, raw: &RawNotification) {
    debug!("Raw event: {} ({:?})", raw.path.display(), raw.operation);

    match raw.operation {
      // Новая директория: расширяем наблюдение до её поддерева до того, как
      // читать следующее уведомление, иначе события из вложенных директорий потеряются.
      RawOperation::Create if is_directory(&raw.path) => {
        info!("New directory detected, adding to watch: {}", raw.path.display());
        let result = self.registrar.register_tree(&raw.path);
        if let Some(err) = result.error {
          warn!("Failed to watch new directory {}: {err}", raw.path.display());
        }
      }
      RawOperation::Remove => self.source.forget(&raw.path),
      _ => {}
    }

    match classify(raw, &self.filters) {
      Classification::Filtered { extension } => {
        trace!(
          "Ignored, extension not in filters: {} ({extension:?})",
          raw.path.display()
        );
      }
      Classification::Ignored(operation) => {
        debug!("{operation:?} ignored: {}", raw.path.display());
      }
      Classification::Renamed { path, file_type } => {
        info!("File renamed: {} ({file_type})", path.display());
      }
      Classification::Accepted(event) => {
        match event.operation {
          FileOperation::Create => info!("File created: {} ({})", event.path.display(), event.file_type),
          FileOperation::Remove => info!("File removed: {} ({})", event.path.display(), event.file_type),
        }
        self.buffer.append(event);
      }
    }
  }
}

fn is_directory(path: &Path) -> bool {
  match fs::metadata(path) {
    Ok(m) => m.is_dir(),
    Err(_) => false,
  }
}
