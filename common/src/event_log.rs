use serde::Serialize;

use crate::hal::LogSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
    Debug,
}

/// Body POSTed to the remote log endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub message: String,
    pub level: LogLevel,
}

/// Lamp events go to the local `log` backend and, when a sink is attached,
/// to the remote endpoint as well. Delivery failures stay here.
pub struct EventLog {
    sink: Option<Box<dyn LogSink + Send>>,
}

impl EventLog {
    pub fn local() -> Self {
        Self { sink: None }
    }

    pub fn with_sink(sink: Box<dyn LogSink + Send>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{message}");
        self.forward(message, LogLevel::Info);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{message}");
        self.forward(message, LogLevel::Error);
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::debug!("{message}");
        self.forward(message, LogLevel::Debug);
    }

    fn forward(&mut self, message: String, level: LogLevel) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let record = LogRecord { message, level };
        if let Err(err) = sink.send(&record) {
            log::debug!("remote log delivery failed: {err}");
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::local()
    }
}
