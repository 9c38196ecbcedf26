//! Типы событий file_watcher и классификация сырых уведомлений.
//!
//! Сырой словарь операций источника (`notify::EventKind`) сводится к закрытому
//! перечислению [`RawOperation`], а затем к двум операциям, которые сохраняются
//! в хранилище: CREATE и REMOVE.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::EventKind;

/// Сырая операция, как её сообщил источник.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawOperation {
    Create,
    Write,
    Remove,
    Rename,
    PermissionChange,
    Unknown,
}

impl From<&EventKind> for RawOperation {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => RawOperation::Create,
            EventKind::Remove(_) => RawOperation::Remove,
            // Новое имя при перемещении: для конвейера это появление файла.
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => RawOperation::Create,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RawOperation::Remove,
            // `Both` разворачивается по путям в `from_notify`; здесь направление неизвестно.
            EventKind::Modify(ModifyKind::Name(_)) => RawOperation::Rename,
            EventKind::Modify(ModifyKind::Metadata(_)) => RawOperation::PermissionChange,
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => RawOperation::Write,
            EventKind::Access(_) => RawOperation::Unknown,
            EventKind::Any | EventKind::Other => RawOperation::Unknown,
        }
    }
}

/// Одно сырое уведомление: путь + операция.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawNotification {
    pub path: PathBuf,
    pub operation: RawOperation,
}

impl RawNotification {
    pub fn new(path: impl Into<PathBuf>, operation: RawOperation) -> Self {
        Self {
            path: path.into(),
            operation,
        }
    }

    /// Развернуть событие `notify` (у него может быть несколько путей) в уведомления.
    ///
    /// Переименование `Both` приходит как пара `[старый, новый]` и превращается
    /// в REMOVE старого пути и CREATE нового.
    pub fn from_notify(event: notify::Event) -> Vec<RawNotification> {
        if let (EventKind::Modify(ModifyKind::Name(RenameMode::Both)), [from, to]) =
            (&event.kind, event.paths.as_slice())
        {
            return vec![
                RawNotification::new(from.clone(), RawOperation::Remove),
                RawNotification::new(to.clone(), RawOperation::Create),
            ];
        }

        let operation = RawOperation::from(&event.kind);
        event
            .paths
            .into_iter()
            .map(|path| RawNotification { path, operation })
            .collect()
    }
}

/// Операция, которая сохраняется в хранилище.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileOperation {
    Create,
    Remove,
}

impl FileOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOperation::Create => "CREATE",
            FileOperation::Remove => "REMOVE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATE" => Some(FileOperation::Create),
            "REMOVE" => Some(FileOperation::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Доменное событие: файл с отслеживаемым расширением появился или исчез.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChangeEvent {
    /// Абсолютный путь.
    pub path: PathBuf,
    pub operation: FileOperation,
    /// Момент классификации (не момент действия в ОС).
    pub timestamp: DateTime<Utc>,
    /// Расширение в нижнем регистре с точкой, например `.exe`.
    pub file_type: String,
}

impl FileChangeEvent {
    pub fn new(path: impl Into<PathBuf>, operation: FileOperation, file_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation,
            timestamp: Utc::now(),
            file_type: file_type.into(),
        }
    }
}

/// Сохранённая запись: событие + идентификатор, выданный хранилищем.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedRecord {
    pub id: i64,
    pub event: FileChangeEvent,
}

/// Результат классификации одного уведомления.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Расширение не входит в набор фильтров.
    Filtered { extension: String },
    /// Запись, смена прав и неизвестные операции.
    Ignored(RawOperation),
    /// Переименование без известного направления: логируется, но не сохраняется.
    Renamed { path: PathBuf, file_type: String },
    Accepted(FileChangeEvent),
}

/// Расширение пути в нижнем регистре с ведущей точкой; пустая строка, если его нет.
pub fn extension_of(path: &Path) -> String {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => format!(".{}", ext.to_lowercase()),
        _ => String::new(),
    }
}

/// Отобразить сырое уведомление в доменное событие или отбросить его.
///
/// `filters` должны быть нормализованы (см. [`crate::config::normalize_extension`]).
pub fn classify(raw: &RawNotification, filters: &[String]) -> Classification {
    let extension = extension_of(&raw.path);
    if extension.is_empty() || !filters.iter().any(|f| *f == extension) {
        return Classification::Filtered { extension };
    }

    let operation = match raw.operation {
        RawOperation::Create => FileOperation::Create,
        RawOperation::Remove => FileOperation::Remove,
        RawOperation::Rename => {
            return Classification::Renamed {
                path: raw.path.clone(),
                file_type: extension,
            }
        }
        RawOperation::Write | RawOperation::PermissionChange | RawOperation::Unknown => {
            return Classification::Ignored(raw.operation)
        }
    };

    Classification::Accepted(FileChangeEvent::new(raw.path.clone(), operation, extension))
}
