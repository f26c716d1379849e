use anyhow::{Context, Result};
use log::{LevelFilter, Metadata, Record};
use ringlog::{Drain, File, LogBuilder, MultiLogBuilder, Output, Stderr};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::LogConfig;

/// Maximum log file size before rotation (10MB)
const LOG_FILE_MAX_SIZE: u64 = 1024 * 1024 * 10;

/// How often queued records are written out.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Parse log filter strings like "hyper=info" into a map of module prefix to level filter
fn parse_log_filters(filters: &[String]) -> HashMap<String, LevelFilter> {
    filters
        .iter()
        .filter_map(|filter| {
            let (module, level) = filter.split_once('=')?;
            let level: LevelFilter = level.parse().ok()?;
            Some((module.to_string(), level))
        })
        .collect()
}

/// Logger with per-module level overrides, writing through a ringlog output
struct FilteredLogger {
    output: Mutex<Box<dyn Output>>,
    max_level: LevelFilter,
    filters: HashMap<String, LevelFilter>,
}

impl FilteredLogger {
    fn module_allows(&self, metadata: &Metadata) -> bool {
        self.filters
            .iter()
            .find(|(prefix, _)| metadata.target().starts_with(prefix.as_str()))
            .is_none_or(|(_, level)| metadata.level() <= *level)
    }
}

impl log::Log for FilteredLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level && self.module_allows(metadata)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata())
            && let Ok(mut output) = self.output.lock()
        {
            let message = format!(
                "{} {} [{}] {}\n",
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                record.target(),
                record.args()
            );
            let _ = output.write_all(message.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut output) = self.output.lock() {
            let _ = output.flush();
        }
    }
}

/// Handle that writes out buffered log records. The ringlog logger only
/// queues records; nothing reaches the output until this is flushed.
pub struct LogFlusher {
    drain: Option<Mutex<Box<dyn Drain>>>,
}

impl LogFlusher {
    pub fn flush(&self) {
        match &self.drain {
            Some(drain) => {
                if let Ok(mut drain) = drain.lock() {
                    let _ = drain.flush();
                }
            }
            None => log::logger().flush(),
        }
    }

    /// Flushes every [`FLUSH_INTERVAL`] until the task is dropped.
    pub async fn run(self: std::sync::Arc<Self>) {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            ticker.tick().await;
            self.flush();
        }
    }
}

/// Installs the global logger: ringlog's queueing logger, or the filtered
/// logger when per-module overrides are configured.
pub fn init(config: &LogConfig) -> Result<LogFlusher> {
    let log_level = config.level.to_level_filter();

    let output: Box<dyn Output> = if let Some(ref log_file) = config.file {
        let backup_file = log_file.with_extension("old");
        Box::new(File::new(log_file.clone(), backup_file, LOG_FILE_MAX_SIZE)?)
    } else {
        Box::new(Stderr::new())
    };

    let filters = parse_log_filters(&config.filter);

    if filters.is_empty() {
        let base_log = LogBuilder::new()
            .output(output)
            .build()
            .map_err(anyhow::Error::msg)
            .context("failed to initialize logger")?;

        let drain = MultiLogBuilder::new()
            .level_filter(log_level)
            .default(base_log)
            .build()
            .start();

        Ok(LogFlusher {
            drain: Some(Mutex::new(drain)),
        })
    } else {
        let logger = FilteredLogger {
            output: Mutex::new(output),
            max_level: log_level,
            filters,
        };

        log::set_boxed_logger(Box::new(logger)).context("failed to set logger")?;
        log::set_max_level(log_level);

        Ok(LogFlusher { drain: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_parse_log_filters() {
        let filters = parse_log_filters(&[
            "hyper=warn".to_string(),
            "warp=DEBUG".to_string(),
            "broken".to_string(),
            "reqwest=loud".to_string(),
        ]);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters["hyper"], LevelFilter::Warn);
        assert_eq!(filters["warp"], LevelFilter::Debug);
    }

    #[test]
    fn test_flushed_records_reach_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.log");
        let config = LogConfig {
            level: LogLevel::Info,
            filter: Vec::new(),
            file: Some(path.clone()),
        };

        let flusher = init(&config).unwrap();
        log::info!("benchmark log line");
        log::debug!("below the configured level");
        flusher.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("benchmark log line"));
        assert!(!contents.contains("below the configured level"));
    }
}
