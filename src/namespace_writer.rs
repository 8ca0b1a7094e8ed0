//! Namespace-filtered dump of a raw operator log.
//!
//! The operator writes one JSON record per line, many of them tagged with the
//! namespace of the object being reconciled. Given the raw log, we keep the
//! lines of one namespace verbatim in a file and remember the last few
//! warning/error lines to show inline.

use crate::error::{CaptureError, Result};
use crate::layout::dump_file_name;
use crate::outcome::{LineOutcome, OutcomeTally, SkipReason};
use crate::parser::{parse_line, strip_line_ending};
use crate::ring::ImportantLogBuffer;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const RULE: &str =
    "================================================================================";

/// Result of a namespace dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDump {
    pub lines_written: usize,
    /// The most recent important lines, oldest first.
    pub important: Vec<String>,
    pub tally: OutcomeTally,
}

/// Filters a raw log stream down to a single namespace.
pub struct NamespaceLogWriter {
    namespace: String,
    important: ImportantLogBuffer,
    tally: OutcomeTally,
}

impl NamespaceLogWriter {
    pub fn new(namespace: impl Into<String>, cap_lines: usize) -> Self {
        Self {
            namespace: namespace.into(),
            important: ImportantLogBuffer::new(cap_lines),
            tally: OutcomeTally::default(),
        }
    }

    fn process_line<W: Write>(&mut self, line: &[u8], out: &mut W) -> LineOutcome {
        let record = match parse_line(line) {
            Ok(record) => record,
            Err(e) => return LineOutcome::Skipped(SkipReason::Malformed(e)),
        };
        if record.namespace.as_deref() != Some(self.namespace.as_str()) {
            return LineOutcome::Skipped(SkipReason::Filtered);
        }
        if record.level.is_important() {
            self.important.append(String::from_utf8_lossy(line));
        }
        match out.write_all(line).and_then(|()| out.write_all(b"\n")) {
            Ok(()) => LineOutcome::Written,
            Err(e) => LineOutcome::Skipped(SkipReason::WriteFailed(e)),
        }
    }

    /// Consume `source` to its end, writing every matching line to `out`.
    ///
    /// Unreadable input ends the scan (there is no way to resume a failed
    /// reader); everything else only costs the offending line.
    pub fn run<R: BufRead, W: Write>(mut self, mut source: R, out: &mut W) -> NamespaceDump {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match source.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = strip_line_ending(&buf);
                    let outcome = self.process_line(line, out);
                    self.tally.record(outcome, line);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Error while scanning log source: {}", e);
                    break;
                }
            }
        }
        if let Err(e) = out.flush() {
            warn!("Error while flushing namespace dump: {}", e);
        }
        NamespaceDump {
            lines_written: self.tally.written,
            important: self.important.render(),
            tally: self.tally,
        }
    }
}

/// Dump the lines of `namespace` found in `raw_logs` to
/// `<out_dir>/<logsType>_ns-<namespace>_<specName>.log` and print the last
/// `cap_lines` important lines to `display`.
pub fn dump_namespace_logs<W: Write>(
    raw_logs: &[u8],
    logs_type: &str,
    namespace: &str,
    spec_name: &str,
    out_dir: &Path,
    cap_lines: usize,
    display: &mut W,
) -> Result<(PathBuf, NamespaceDump)> {
    std::fs::create_dir_all(out_dir).map_err(|e| CaptureError::io(out_dir, e))?;
    let path = out_dir.join(dump_file_name(logs_type, namespace, spec_name));
    let file = File::create(&path).map_err(|e| CaptureError::io(&path, e))?;
    let mut writer = BufWriter::new(file);

    let dump = NamespaceLogWriter::new(namespace, cap_lines).run(raw_logs, &mut writer);

    match writer.into_inner() {
        Ok(file) => {
            if let Err(e) = file.sync_all() {
                warn!("Error while syncing {}: {}", path.display(), e);
            }
        }
        Err(e) => warn!("Error while flushing {}: {}", path.display(), e.error()),
    }

    let banner = format!(
        "DUMPING tailed {} with error/warning (at most {} lines). Namespace: {}, Failed Spec: {}",
        logs_type, cap_lines, namespace, spec_name
    );
    if let Err(e) = print_summary(display, &banner, &dump.important) {
        warn!("Error while printing the summary of namespace {}: {}", namespace, e);
    }

    info!(
        "Saved {} lines for namespace {} to {}",
        dump.lines_written,
        namespace,
        path.display()
    );
    Ok((path, dump))
}

fn print_summary<W: Write>(
    display: &mut W,
    banner: &str,
    lines: &[String],
) -> std::io::Result<()> {
    writeln!(display, "{banner}")?;
    writeln!(display, "{RULE}")?;
    for line in lines {
        writeln!(display, "{line}")?;
    }
    writeln!(display, "{RULE}")?;
    display.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::NO_IMPORTANT_LOGS;

    const LOG: &str = concat!(
        r#"{"level":"info","msg":"reconciling","namespace":"ns-a"}"#,
        "\n",
        r#"{"level":"error","msg":"boom","namespace":"ns-b"}"#,
        "\n",
        "not json at all\n",
        r#"{"level":"warning","msg":"slow","namespace":"ns-a"}"#,
        "\n",
        r#"{"level":"info","msg":"no namespace"}"#,
        "\n",
        r#"{"level":"error","msg":"failed","namespace":"ns-a"}"#,
        "\r\n",
    );

    fn run(namespace: &str, cap: usize) -> (String, NamespaceDump) {
        let mut out = Vec::new();
        let dump = NamespaceLogWriter::new(namespace, cap).run(LOG.as_bytes(), &mut out);
        (String::from_utf8(out).unwrap(), dump)
    }

    #[test]
    fn test_keeps_only_target_namespace_verbatim() {
        let (out, dump) = run("ns-a", 5);
        assert_eq!(
            out,
            concat!(
                r#"{"level":"info","msg":"reconciling","namespace":"ns-a"}"#,
                "\n",
                r#"{"level":"warning","msg":"slow","namespace":"ns-a"}"#,
                "\n",
                r#"{"level":"error","msg":"failed","namespace":"ns-a"}"#,
                "\n",
            )
        );
        assert_eq!(dump.lines_written, 3);
        assert_eq!(dump.tally.malformed, 1);
        assert_eq!(dump.tally.filtered, 2);
    }

    #[test]
    fn test_important_summary() {
        let (_, dump) = run("ns-a", 5);
        assert_eq!(
            dump.important,
            vec![
                r#"{"level":"warning","msg":"slow","namespace":"ns-a"}"#,
                r#"{"level":"error","msg":"failed","namespace":"ns-a"}"#,
            ]
        );

        let (_, dump) = run("ns-a", 1);
        assert_eq!(
            dump.important,
            vec![r#"{"level":"error","msg":"failed","namespace":"ns-a"}"#]
        );
    }

    #[test]
    fn test_no_match() {
        let (out, dump) = run("ns-c", 5);
        assert!(out.is_empty());
        assert_eq!(dump.lines_written, 0);
        assert_eq!(dump.important, vec![NO_IMPORTANT_LOGS]);
    }

    #[test]
    fn test_each_line_lands_in_exactly_one_namespace() {
        let (a, _) = run("ns-a", 5);
        let (b, _) = run("ns-b", 5);
        for line in a.lines() {
            assert!(!b.contains(line));
        }
        assert_eq!(b.lines().count(), 1);
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_errors_do_not_stop_the_scan() {
        let dump = NamespaceLogWriter::new("ns-a", 5).run(LOG.as_bytes(), &mut FailingWriter);
        assert_eq!(dump.lines_written, 0);
        assert_eq!(dump.tally.write_failed, 3);
        // important lines are still collected for display
        assert_eq!(dump.important.len(), 2);
    }

    #[test]
    fn test_dump_namespace_logs_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let mut display = Vec::new();

        let (path, first) = dump_namespace_logs(
            LOG.as_bytes(),
            "operator_logs",
            "ns-a",
            "my failing spec",
            dir.path(),
            5,
            &mut display,
        )
        .unwrap();
        assert_eq!(
            path,
            dir.path().join("operator_logs_ns-ns-a_my_failing_spec.log")
        );
        let first_bytes = std::fs::read(&path).unwrap();

        let (_, second) = dump_namespace_logs(
            LOG.as_bytes(),
            "operator_logs",
            "ns-a",
            "my failing spec",
            dir.path(),
            5,
            &mut Vec::new(),
        )
        .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first_bytes);
        assert_eq!(first, second);

        let display = String::from_utf8(display).unwrap();
        assert!(display.contains("at most 5 lines"));
        assert!(display.contains(r#""msg":"failed""#));
    }

    #[test]
    fn test_summary_display_failure_still_saves() {
        let dir = tempfile::tempdir().unwrap();
        let (path, dump) = dump_namespace_logs(
            LOG.as_bytes(),
            "operator_logs",
            "ns-a",
            "spec",
            dir.path(),
            5,
            &mut FailingWriter,
        )
        .unwrap();
        assert_eq!(dump.lines_written, 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_keeps_any_object_of_the_namespace() {
        let log = concat!(
            r#"{"msg":"restore failed","message":"dup","level":"error","namespace":"ns-a"}"#,
            "\n",
            r#"{"msg":"verbose","level":2,"namespace":"ns-a"}"#,
            "\n",
            r#"{"msg":"ok","level":"info","namespace":"ns-a"}"#,
            "\n",
        );
        let mut out = Vec::new();
        let dump = NamespaceLogWriter::new("ns-a", 5).run(log.as_bytes(), &mut out);
        assert_eq!(dump.lines_written, 3);
        assert_eq!(dump.tally.malformed, 0);
        assert_eq!(String::from_utf8(out).unwrap(), log);
        assert_eq!(
            dump.important,
            vec![r#"{"msg":"restore failed","message":"dup","level":"error","namespace":"ns-a"}"#]
        );
    }
}
