//! Best-effort decoding of structured log lines.
//!
//! A line that cannot be decoded is never fatal: callers get a
//! [`ParseError`] back, report it, and move on to the next line.

use crate::types::LogRecord;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("not a JSON object")]
    NotAnObject,

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode one line (without its trailing newline) into a [`LogRecord`].
pub fn parse_line(line: &[u8]) -> Result<LogRecord, ParseError> {
    let trimmed = line.trim_ascii();
    match trimmed.first() {
        None => Err(ParseError::Empty),
        Some(b'{') => match serde_json::from_slice::<Value>(trimmed)? {
            Value::Object(fields) => Ok(LogRecord::from_fields(&fields)),
            _ => Err(ParseError::NotAnObject),
        },
        Some(_) => Err(ParseError::NotAnObject),
    }
}

/// Strip the line terminator (`\n` or `\r\n`) left by `read_until`.
pub fn strip_line_ending(mut line: &[u8]) -> &[u8] {
    if let Some(rest) = line.strip_suffix(b"\n") {
        line = rest;
    }
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogLevel;

    #[test]
    fn test_parse_operator_line() {
        let line = br#"{"level":"warning","ts":1700000000.5,"logger":"cluster","msg":"instance not ready","namespace":"ns-a"}"#;
        let record = parse_line(line).unwrap();
        assert_eq!(record.namespace.as_deref(), Some("ns-a"));
        assert_eq!(record.level, LogLevel::Warning);
        assert_eq!(record.logger.as_deref(), Some("cluster"));
        assert_eq!(record.message, "instance not ready");
    }

    #[test]
    fn test_parse_tagged_line() {
        let line = br#"{ "message": "ready", "namespace": "ns", "podName": "pg-1", "containerName": "postgres" }"#;
        let record = parse_line(line).unwrap();
        assert_eq!(record.message, "ready");
        assert_eq!(record.pod_name.as_deref(), Some("pg-1"));
        assert_eq!(record.container_name.as_deref(), Some("postgres"));
        assert_eq!(record.level, LogLevel::Unknown);
    }

    #[test]
    fn test_missing_fields_default() {
        let record = parse_line(b"{}").unwrap();
        assert_eq!(record.namespace, None);
        assert_eq!(record.level, LogLevel::Unknown);
        assert!(record.message.is_empty());
    }

    #[test]
    fn test_unrecognized_level_is_unknown() {
        let record = parse_line(br#"{"level":"notice"}"#).unwrap();
        assert_eq!(record.level, LogLevel::Unknown);
        assert!(!record.level.is_important());
    }

    #[test]
    fn test_structured_message_is_kept_as_text() {
        let record = parse_line(br#"{"msg":{"a":1}}"#).unwrap();
        assert_eq!(record.message, r#"{"a":1}"#);
    }

    #[test]
    fn test_msg_and_message_together() {
        let line = br#"{"msg":"backup failed","message":"ignored","level":"error","namespace":"ns-a"}"#;
        let record = parse_line(line).unwrap();
        assert_eq!(record.message, "backup failed");
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.namespace.as_deref(), Some("ns-a"));
    }

    #[test]
    fn test_mistyped_fields_fall_back() {
        let line = br#"{"level":2,"logger":["a"],"namespace":"ns-a","podName":7}"#;
        let record = parse_line(line).unwrap();
        assert_eq!(record.level, LogLevel::Unknown);
        assert_eq!(record.logger, None);
        assert_eq!(record.pod_name, None);
        assert_eq!(record.namespace.as_deref(), Some("ns-a"));

        let record = parse_line(br#"{"namespace":{"name":"ns-a"}}"#).unwrap();
        assert_eq!(record.namespace, None);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(parse_line(b"   "), Err(ParseError::Empty)));
        assert!(matches!(parse_line(b"plain text"), Err(ParseError::NotAnObject)));
        assert!(matches!(parse_line(b"[1,2]"), Err(ParseError::NotAnObject)));
        assert!(matches!(parse_line(br#"{"level": "#), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_strip_line_ending() {
        assert_eq!(strip_line_ending(b"abc\r\n"), b"abc");
        assert_eq!(strip_line_ending(b"abc\n"), b"abc");
        assert_eq!(strip_line_ending(b"abc"), b"abc");
    }
}
