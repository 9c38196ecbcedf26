//! Хранилище событий на SQLite.
//!
//! Одна таблица `file_events`, уникальность по `path`: более позднее событие
//! для того же пути перезаписывает строку целиком (upsert), так что в таблице
//! хранится текущее состояние каждого пути, а не история.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, Row, Statement};

use crate::error::{MonitorError, Result};
use crate::file_watcher::{FileChangeEvent, FileOperation, PersistedRecord};

/// Текстовый формат времени в таблице. Лексикографический порядок совпадает с хронологическим.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS file_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        path TEXT NOT NULL UNIQUE,
        operation TEXT NOT NULL,
        file_type TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_file_events_timestamp ON file_events(timestamp);
";

const UPSERT: &str = "
    INSERT INTO file_events (timestamp, path, operation, file_type)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(path) DO UPDATE SET
        timestamp = excluded.timestamp,
        operation = excluded.operation,
        file_type = excluded.file_type
";

const SELECT_COLUMNS: &str = "SELECT id, timestamp, path, operation, file_type FROM file_events";

/// Контракт записи и чтения, на который опирается монитор.
pub trait EventStore: Send + Sync {
    /// Вставить или заменить одну запись (ключ конфликта: `path`).
    fn upsert_one(&self, event: &FileChangeEvent) -> Result<()>;

    /// Атомарно вставить batch: видны либо все записи, либо ни одной.
    fn upsert_batch(&self, events: &[FileChangeEvent]) -> Result<()>;

    /// Все записи, от новых к старым.
    fn all_records(&self) -> Result<Vec<PersistedRecord>>;

    /// Записи в диапазоне `[start, end]`, от новых к старым.
    fn records_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<PersistedRecord>>;

    /// Закрыть хранилище. Дальнейшие операции возвращают [`MonitorError::StoreClosed`].
    fn close(&self) -> Result<()>;
}

pub struct SqliteEventStore {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteEventStore {
    /// Открыть (или создать) базу по пути. Недостающие директории создаются.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;

        let conn = Connection::open(path).map_err(|source| MonitorError::StoreOpen {
            path: path.to_path_buf(),
            source,
        })?;
        conn.execute_batch(SCHEMA).map_err(|source| MonitorError::StoreOpen {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Store opened: {}", path.display());
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Открыть существующую базу только для чтения. `None`, если файла нет.
    ///
    /// Ни директории, ни файл, ни схема не создаются.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.is_file() {
            debug!("Store not found, nothing to read: {}", path.display());
            return Ok(None);
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(|source| {
            MonitorError::StoreOpen {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!("Store opened read-only: {}", path.display());
        Ok(Some(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
        }))
    }

    /// База в памяти (для тестов).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<PersistedRecord>> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(MonitorError::StoreClosed)?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

impl EventStore for SqliteEventStore {
    fn upsert_one(&self, event: &FileChangeEvent) -> Result<()> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(MonitorError::StoreClosed)?;
        debug!("Upsert event: {} {}", event.operation, event.path.display());
        let mut stmt = conn.prepare_cached(UPSERT)?;
        execute_upsert(&mut stmt, event)?;
        Ok(())
    }

    fn upsert_batch(&self, events: &[FileChangeEvent]) -> Result<()> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(MonitorError::StoreClosed)?;

        // Любая ошибка до commit() откатывает транзакцию при drop.
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT)?;
            for event in events {
                execute_upsert(&mut stmt, event)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn all_records(&self) -> Result<Vec<PersistedRecord>> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY timestamp DESC, id DESC"), [])
    }

    fn records_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<PersistedRecord>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY timestamp DESC, id DESC"),
            params![format_timestamp(&start), format_timestamp(&end)],
        )
    }

    fn close(&self) -> Result<()> {
        if let Some(conn) = self.lock().take() {
            conn.close().map_err(|(_, err)| MonitorError::Store(err))?;
            info!("Store closed");
        }
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    // Относительный путь без директории: текущая директория.
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|source| MonitorError::StoreDirectory {
        path: dir.to_path_buf(),
        source,
    })?;
    info!("Directory created: {}", dir.display());
    Ok(())
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn execute_upsert(stmt: &mut Statement<'_>, event: &FileChangeEvent) -> rusqlite::Result<usize> {
    stmt.execute(params![
        format_timestamp(&event.timestamp),
        event.path.to_string_lossy().into_owned(),
        event.operation.as_str(),
        event.file_type,
    ])
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<PersistedRecord> {
    let timestamp: String = row.get(1)?;
    let timestamp = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    let operation: String = row.get(3)?;
    let operation = FileOperation::parse(&operation).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, format!("unknown operation {operation:?}").into())
    })?;

    let path: String = row.get(2)?;
    Ok(PersistedRecord {
        id: row.get(0)?,
        event: FileChangeEvent {
            path: PathBuf::from(path),
            operation,
            timestamp,
            file_type: row.get(4)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn event(path: &str, operation: FileOperation) -> FileChangeEvent {
        FileChangeEvent::new(path, operation, ".exe")
    }

    fn add_poison_trigger(store: &SqliteEventStore) {
        let guard = store.lock();
        guard
            .as_ref()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_poison BEFORE INSERT ON file_events
                 WHEN NEW.path LIKE '%poison%'
                 BEGIN SELECT RAISE(ABORT, 'poisoned path'); END;",
            )
            .unwrap();
    }

    #[test]
    fn test_upsert_replaces_row_for_same_path() {
        let store = SqliteEventStore::in_memory().unwrap();
        store.upsert_one(&event("/r/a.exe", FileOperation::Create)).unwrap();
        store.upsert_one(&event("/r/a.exe", FileOperation::Remove)).unwrap();

        let records = store.all_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.operation, FileOperation::Remove);
    }

    #[test]
    fn test_upsert_keeps_row_identity() {
        let store = SqliteEventStore::in_memory().unwrap();
        store.upsert_one(&event("/r/a.exe", FileOperation::Create)).unwrap();
        let id = store.all_records().unwrap()[0].id;

        store.upsert_batch(&[event("/r/a.exe", FileOperation::Remove)]).unwrap();
        assert_eq!(store.all_records().unwrap()[0].id, id);
    }

    #[test]
    fn test_batch_deduplicates_by_path_last_write_wins() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .upsert_batch(&[
                event("/r/a.exe", FileOperation::Create),
                event("/r/b.exe", FileOperation::Create),
                event("/r/a.exe", FileOperation::Remove),
            ])
            .unwrap();

        let mut records = store.all_records().unwrap();
        records.sort_by(|a, b| a.event.path.cmp(&b.event.path));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event.operation, FileOperation::Remove);
        assert_eq!(records[1].event.operation, FileOperation::Create);
    }

    #[test]
    fn test_failed_batch_is_rolled_back() {
        let store = SqliteEventStore::in_memory().unwrap();
        add_poison_trigger(&store);

        let result = store.upsert_batch(&[
            event("/r/good.exe", FileOperation::Create),
            event("/r/poison.exe", FileOperation::Create),
        ]);
        assert!(matches!(result, Err(MonitorError::Store(_))));
        assert!(store.all_records().unwrap().is_empty());
    }

    #[test]
    fn test_records_are_ordered_newest_first_and_filtered_by_range() {
        let store = SqliteEventStore::in_memory().unwrap();
        let now = Utc::now();

        let mut old = event("/r/old.exe", FileOperation::Create);
        old.timestamp = now - Duration::hours(2);
        let mut mid = event("/r/mid.exe", FileOperation::Create);
        mid.timestamp = now - Duration::hours(1);
        let mut new = event("/r/new.exe", FileOperation::Remove);
        new.timestamp = now;
        store.upsert_batch(&[old, new, mid]).unwrap();

        let all: Vec<_> = store.all_records().unwrap().into_iter().map(|r| r.event.path).collect();
        assert_eq!(
            all,
            vec![
                PathBuf::from("/r/new.exe"),
                PathBuf::from("/r/mid.exe"),
                PathBuf::from("/r/old.exe"),
            ]
        );

        let ranged = store
            .records_between(now - Duration::minutes(90), now + Duration::seconds(1))
            .unwrap();
        assert_eq!(ranged.len(), 2);
        assert_eq!(ranged[1].event.path, PathBuf::from("/r/mid.exe"));
    }

    #[test]
    fn test_open_creates_missing_directories_and_is_idempotent() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("nested").join("dir").join("monitor.db");

        let store = SqliteEventStore::open(&db_path).unwrap();
        store.upsert_one(&event("/r/a.exe", FileOperation::Create)).unwrap();
        store.close().unwrap();
        assert!(db_path.exists());

        let reopened = SqliteEventStore::open(&db_path).unwrap();
        assert_eq!(reopened.all_records().unwrap().len(), 1);
    }

    #[test]
    fn test_read_only_open_creates_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("missing").join("monitor.db");

        assert!(SqliteEventStore::open_read_only(&db_path).unwrap().is_none());
        assert!(!db_path.parent().unwrap().exists());
    }

    #[test]
    fn test_read_only_store_reads_but_rejects_writes() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("monitor.db");
        let store = SqliteEventStore::open(&db_path).unwrap();
        store.upsert_one(&event("/r/a.exe", FileOperation::Create)).unwrap();
        store.close().unwrap();

        let reader = SqliteEventStore::open_read_only(&db_path).unwrap().unwrap();
        assert_eq!(reader.all_records().unwrap().len(), 1);
        assert!(matches!(
            reader.upsert_one(&event("/r/b.exe", FileOperation::Create)),
            Err(MonitorError::Store(_))
        ));
    }

    #[test]
    fn test_open_fails_when_parent_is_a_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"not a dir").unwrap();

        let result = SqliteEventStore::open(blocker.join("sub").join("monitor.db"));
        assert!(matches!(result, Err(MonitorError::StoreDirectory { .. })));
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = SqliteEventStore::in_memory().unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.upsert_batch(&[event("/r/a.exe", FileOperation::Create)]),
            Err(MonitorError::StoreClosed)
        ));
    }
}
