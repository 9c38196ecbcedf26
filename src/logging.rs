//! Нормализованное логирование для io_monitor.
//!
//! ## Уровни логов
//! - `ERROR`: потеря данных (неудачный финальный flush), невозможность старта
//! - `WARN`:  ошибки источника событий, неудачная регистрация директории, неудачный batch
//! - `INFO`:  жизненный цикл (start, stop, завершение обхода), CREATE/REMOVE, итоги flush
//! - `DEBUG`: сырые уведомления и решения фильтра
//! - `TRACE`: максимально детальный вывод
//!
//! ## Использование
//! ```ignore
//! use io_monitor::logging::init_logging;
//!
//! init_logging(); // вызывается один раз при старте
//! log::info!("Monitor started");
//! ```

use std::io::Write;
use std::sync::Once;

use log::{Level, LevelFilter};

static INIT: Once = Once::new();

/// Инициализировать логирование (idempotent).
///
/// Управление уровнем логов: переменная окружения `RUST_LOG`.
/// Примеры:
/// - `RUST_LOG=info`: только INFO и выше
/// - `RUST_LOG=io_monitor=debug`: DEBUG для нашего crate
pub fn init_logging() {
    init_logging_with_level(LevelFilter::Info);
}

/// То же, что [`init_logging`], но с явным уровнем для нашего crate.
///
/// Применяется только при первом вызове; `RUST_LOG` по-прежнему имеет приоритет.
pub fn init_logging_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        let _ = env_logger::Builder::new()
            .format(|buf, record| {
                // Формат: [timestamp] [LEVEL] [target] message
                writeln!(
                    buf,
                    "[{}] [{}] [{}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    level_tag(record.level()),
                    record.target(),
                    record.args()
                )
            })
            .filter_module("io_monitor", level)
            .filter_module("iomonitor", level)
            .filter_module("notify", LevelFilter::Warn)
            .parse_env("RUST_LOG")
            .try_init();
    });
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "E",
        Level::Warn => "W",
        Level::Info => "I",
        Level::Debug => "D",
        Level::Trace => "T",
    }
}
