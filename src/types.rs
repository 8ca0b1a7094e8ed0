use serde::Serialize;
use serde_json::{Map, Value};

/// Severity carried in the `level` field of a structured log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    #[default]
    Unknown,
}

impl LogLevel {
    /// Exact, lowercase level names. Anything else is `Unknown`.
    pub fn from_field(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("trace") => Self::Trace,
            Some("debug") => Self::Debug,
            Some("info") => Self::Info,
            Some("warning") => Self::Warning,
            Some("error") => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Warning and error lines are the ones worth showing inline.
    pub fn is_important(self) -> bool {
        matches!(self, Self::Warning | Self::Error)
    }
}

/// One decoded log line. Absent or mistyped fields stay at their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    pub namespace: Option<String>,
    pub level: LogLevel,
    pub logger: Option<String>,
    pub message: String,
    pub pod_name: Option<String>,
    pub container_name: Option<String>,
}

impl LogRecord {
    /// Pick the known fields out of a decoded JSON object.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
        let message = match fields.get("msg").or_else(|| fields.get("message")) {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
        };
        Self {
            namespace: text("namespace"),
            level: LogLevel::from_field(fields.get("level")),
            logger: text("logger"),
            message,
            pod_name: text("podName"),
            container_name: text("containerName"),
        }
    }
}

/// A container log line tagged with its origin, as written into the tail pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedLine {
    pub message: String,
    pub namespace: String,
    #[serde(rename = "podName")]
    pub pod_name: String,
    #[serde(rename = "containerName")]
    pub container_name: String,
}

/// Identity of a single container log stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerKey {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
}

impl std::fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.pod_name, self.container_name
        )
    }
}
