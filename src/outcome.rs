//! What happened to each log line, and the single place that decides how a
//! skipped line is reported.

use crate::error::CaptureError;
use crate::parser::ParseError;
use tracing::{trace, warn};

#[derive(Debug)]
pub enum LineOutcome {
    Written,
    Skipped(SkipReason),
}

#[derive(Debug)]
pub enum SkipReason {
    /// The line did not belong to the requested namespace.
    Filtered,
    Malformed(ParseError),
    /// The record does not name a usable namespace/pod/container.
    NoTarget,
    OpenFailed(CaptureError),
    WriteFailed(std::io::Error),
}

/// Counters per outcome. Filled by [`OutcomeTally::record`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    pub written: usize,
    pub filtered: usize,
    pub malformed: usize,
    pub no_target: usize,
    pub open_failed: usize,
    pub write_failed: usize,
}

impl OutcomeTally {
    /// Count the outcome and emit its diagnostic. Never fails: a bad line
    /// costs that line only.
    pub fn record(&mut self, outcome: LineOutcome, line: &[u8]) {
        let reason = match outcome {
            LineOutcome::Written => {
                self.written += 1;
                return;
            }
            LineOutcome::Skipped(reason) => reason,
        };
        match reason {
            SkipReason::Filtered => {
                self.filtered += 1;
            }
            SkipReason::Malformed(e) => {
                self.malformed += 1;
                warn!(
                    "Could not parse log line {:?}: {}",
                    String::from_utf8_lossy(line),
                    e
                );
            }
            SkipReason::NoTarget => {
                self.no_target += 1;
                trace!(
                    "No target file for log line {:?}",
                    String::from_utf8_lossy(line)
                );
            }
            SkipReason::OpenFailed(e) => {
                self.open_failed += 1;
                warn!("No file to write log line to: {}", e);
            }
            SkipReason::WriteFailed(e) => {
                self.write_failed += 1;
                warn!("Could not write log line: {}", e);
            }
        }
    }

    /// Lines dropped for a reason other than filtering.
    pub fn dropped(&self) -> usize {
        self.malformed + self.no_target + self.open_failed + self.write_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_each_reason() {
        let mut tally = OutcomeTally::default();
        tally.record(LineOutcome::Written, b"a");
        tally.record(LineOutcome::Written, b"b");
        tally.record(LineOutcome::Skipped(SkipReason::Filtered), b"c");
        tally.record(
            LineOutcome::Skipped(SkipReason::Malformed(ParseError::NotAnObject)),
            b"d",
        );
        tally.record(LineOutcome::Skipped(SkipReason::NoTarget), b"e");
        tally.record(
            LineOutcome::Skipped(SkipReason::WriteFailed(std::io::Error::other("disk full"))),
            b"f",
        );

        assert_eq!(tally.written, 2);
        assert_eq!(tally.filtered, 1);
        assert_eq!(tally.malformed, 1);
        assert_eq!(tally.no_target, 1);
        assert_eq!(tally.write_failed, 1);
        assert_eq!(tally.dropped(), 3);
    }
}
