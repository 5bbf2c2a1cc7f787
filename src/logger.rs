use crate::env;
use console::style;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, RwLock};

#[derive(Debug)]
struct Logger {
    level: LevelFilter,
    term_level: RwLock<LevelFilter>,
    file_level: LevelFilter,
    log_file: Option<Mutex<File>>,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if record.level() <= self.file_level
            && let Some(log_file) = &self.log_file
        {
            let mut log_file = log_file.lock().unwrap_or_else(|e| e.into_inner());
            let out = format!(
                "{} {} {} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                std::process::id(),
                self.render_level(record.level(), false),
                self.render_message(record)
            );
            let _ = writeln!(log_file, "{}", console::strip_ansi_codes(&out));
        }
        if record.level() <= *self.term_level.read().unwrap_or_else(|e| e.into_inner()) {
            eprintln!(
                "{} {}",
                self.render_level(record.level(), true),
                self.render_message(record)
            );
        }
    }

    fn flush(&self) {
        if let Some(log_file) = &self.log_file {
            let _ = log_file.lock().unwrap_or_else(|e| e.into_inner()).flush();
        }
    }
}

static LOGGER: Lazy<Logger> = Lazy::new(Logger::new);

impl Logger {
    fn new() -> Self {
        let term_level = *env::TREMA_LOG;
        let file_level = *env::TREMA_LOG_FILE_LEVEL;
        let log_file = env::TREMA_LOG_FILE.as_ref().and_then(|path| {
            if let Some(parent) = path.parent() {
                let _ = xx::file::mkdirp(parent);
            }
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => Some(Mutex::new(f)),
                Err(err) => {
                    eprintln!("trema: could not open log file {}: {err}", path.display());
                    None
                }
            }
        });
        let file_level = if log_file.is_some() {
            file_level
        } else {
            LevelFilter::Off
        };

        Logger {
            level: term_level.max(file_level),
            term_level: RwLock::new(term_level),
            file_level,
            log_file,
        }
    }

    fn render_level(&self, level: Level, color: bool) -> String {
        let name = format!("{:<5}", level.to_string());
        if !color {
            return name;
        }
        match level {
            Level::Error => style(name).red().to_string(),
            Level::Warn => style(name).yellow().to_string(),
            Level::Info => style(name).cyan().to_string(),
            Level::Debug => style(name).magenta().to_string(),
            Level::Trace => style(name).dim().to_string(),
        }
    }

    fn render_message(&self, record: &Record) -> String {
        // Records logged on a worker's target are prefixed with the worker name
        if is_crate_target(record.target()) {
            record.args().to_string()
        } else {
            format!("[{}] {}", record.target(), record.args())
        }
    }
}

/// Module paths of this crate, as opposed to a worker name like `trema_switch`.
fn is_crate_target(target: &str) -> bool {
    target == "trema" || target.starts_with("trema::")
}

pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if let Err(err) = log::set_logger(&*LOGGER).map(|()| log::set_max_level(LOGGER.level)) {
            eprintln!("trema: could not initialize logger: {err}");
        }
    });
}

/// Raise or lower the console log level after startup, e.g. from `--logging-level`.
pub fn set_level(level: LevelFilter) {
    *LOGGER.term_level.write().unwrap_or_else(|e| e.into_inner()) = level;
    log::set_max_level(level.max(LOGGER.file_level));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_targets_are_prefixed() {
        assert!(is_crate_target("trema"));
        assert!(is_crate_target("trema::supervisor::lifecycle"));
        assert!(!is_crate_target("trema_switch"));
        assert!(!is_crate_target("tremaSwitch"));
        assert!(!is_crate_target("LearningSwitch"));
    }
}
