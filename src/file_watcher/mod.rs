//! Модуль мониторинга файловой системы.
//!
//! Отвечает за:
//! - рекурсивную регистрацию корней в источнике `notify`
//! - расширение наблюдения на директории, созданные после старта
//! - классификацию сырых уведомлений в CREATE / REMOVE

pub mod classifier;
pub mod events;
pub mod registrar;
pub mod source;

pub use classifier::EventClassifier;
pub use events::{
  classify, extension_of, Classification, FileChangeEvent, FileOperation, PersistedRecord, RawNotification,
  RawOperation,
};
pub use registrar::{RecursiveRegistrar, TreeRegistration};
pub use source::{watch_channel, NotifyWatchSource, RegisterOutcome, WatchSenders, WatchSource, WatchStreams};
