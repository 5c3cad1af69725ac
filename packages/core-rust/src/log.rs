//! Minimal logging sink injected into middleware.

use std::fmt::{self, Display, Write as _};

pub use tracing::Level;

/// A structured field: name and displayable value.
pub type Field<'a> = (&'a str, &'a dyn Display);

/// Destination for middleware log records.
pub trait Logger: Send + Sync + 'static {
    fn log(&self, level: Level, message: &str, fields: &[Field<'_>]);
}

/// Forwards records to `tracing` events.
///
/// Field names are dynamic, so they are rendered into a single `fields`
/// value (`key=value key=value`).
#[derive(Debug, Clone)]
pub struct TracingLogger {
    name: &'static str,
}

impl TracingLogger {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("meridian")
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, fields: &[Field<'_>]) {
        let rendered = render_fields(fields);
        let logger = self.name;
        if level == Level::ERROR {
            tracing::error!(logger = logger, fields = %rendered, "{message}");
        } else if level == Level::WARN {
            tracing::warn!(logger = logger, fields = %rendered, "{message}");
        } else if level == Level::INFO {
            tracing::info!(logger = logger, fields = %rendered, "{message}");
        } else if level == Level::DEBUG {
            tracing::debug!(logger = logger, fields = %rendered, "{message}");
        } else {
            tracing::trace!(logger = logger, fields = %rendered, "{message}");
        }
    }
}

fn render_fields(fields: &[Field<'_>]) -> String {
    let mut out = String::new();
    for (idx, (key, value)) in fields.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        // Writing into a String cannot fail.
        let _ = write!(out, "{key}={value}");
    }
    out
}

impl fmt::Debug for dyn Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Logger")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::{Field, Level, Logger};

    /// A captured log record.
    #[derive(Debug, Clone)]
    pub struct Record {
        pub level: Level,
        pub message: String,
        pub fields: Vec<(String, String)>,
    }

    impl Record {
        pub fn field(&self, name: &str) -> Option<&str> {
            self.fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        }
    }

    /// Logger that keeps every record in memory.
    #[derive(Debug, Default)]
    pub struct MemoryLogger {
        records: Mutex<Vec<Record>>,
    }

    impl MemoryLogger {
        pub fn records(&self) -> Vec<Record> {
            self.records.lock().clone()
        }
    }

    impl Logger for MemoryLogger {
        fn log(&self, level: Level, message: &str, fields: &[Field<'_>]) {
            self.records.lock().push(Record {
                level,
                message: message.to_string(),
                fields: fields
                    .iter()
                    .map(|(key, value)| ((*key).to_string(), value.to_string()))
                    .collect(),
            });
        }
    }
}
