//! Error budget: turns per-stage failure counts into a per-file verdict.

use crate::parser::ParserReport;
use crate::writer::WriterReport;
use serde::Serialize;

/// Verdict for one fully streamed file.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FileOutcome {
    pub processed_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    /// `processed_count == 0 || error_rate < threshold`
    pub accepted: bool,
}

impl FileOutcome {
    /// Compute the outcome for `errors` failures out of `lines` input lines.
    #[must_use]
    pub fn evaluate(lines: u64, errors: u64, threshold: f64) -> Self {
        if lines == 0 {
            return Self {
                processed_count: 0,
                error_count: errors,
                error_rate: 0.0,
                accepted: true,
            };
        }
        let error_rate = errors as f64 / lines as f64;
        Self {
            processed_count: lines,
            error_count: errors,
            error_rate,
            accepted: error_rate < threshold,
        }
    }
}

/// Collects the final counters of every stage of one file.
#[derive(Clone, Debug)]
pub struct ErrorBudget {
    threshold: f64,
    parse_errors: u64,
    write_errors: u64,
}

impl ErrorBudget {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            parse_errors: 0,
            write_errors: 0,
        }
    }

    pub fn add_parser(&mut self, report: &ParserReport) {
        self.parse_errors += report.errors.total();
    }

    pub fn add_writer(&mut self, report: &WriterReport) {
        self.write_errors += report.failed;
    }

    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.parse_errors + self.write_errors
    }

    /// Outcome against the total number of lines read from the file.
    #[must_use]
    pub fn outcome(&self, lines: u64) -> FileOutcome {
        FileOutcome::evaluate(lines, self.total_errors(), self.threshold)
    }
}
