use log::{LevelFilter, Log, Metadata, Record};

/// Writes `[LEVEL target] message` lines to stderr, keeping stdout free for
/// the program's own output. Filtering follows `log::max_level`.
struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs the stderr logger; a second call only moves the max level.
pub fn init(level: LevelFilter) {
    if log::set_boxed_logger(Box::new(Logger)).is_err() {
        log::debug!("logger already installed");
    }
    log::set_max_level(level);
}
