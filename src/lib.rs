//! io_monitor
//!
//! Непрерывное наблюдение за деревьями директорий: создание и удаление файлов
//! с заданными расширениями накапливаются в памяти и периодически пачками
//! сохраняются в SQLite (одна строка на путь, последнее событие побеждает).
//!
//! Внешний API: [`Monitor`]. Разбор аргументов и сигналы живут в бинарнике `iomonitor`.

pub mod buffer;
pub mod config;
pub mod error;
pub mod file_watcher;
pub mod logging;
pub mod monitor;
pub mod scheduler;
pub mod store;

pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use file_watcher::{FileChangeEvent, FileOperation, PersistedRecord};
pub use monitor::Monitor;
pub use store::{EventStore, SqliteEventStore};
