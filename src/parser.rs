//! Parser stage: raw lines in, encoded records out.
//!
//! A line is `device_type \t device_id \t lat \t lon \t app_id,app_id,...`.
//! The parser is strict about the first four fields and lenient about the app
//! list: tokens that are not unsigned 32-bit integers are dropped without
//! counting as an error.

use crate::config::ShardMap;
use crate::record::ParsedRecord;
use crate::router::ShardRouter;
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Field delimiter within a line.
pub const FIELD_DELIMITER: char = '\t';

/// Delimiter between app identifiers in the last field.
pub const APP_DELIMITER: char = ',';

const FIELD_COUNT: usize = 5;

/// Why a line was rejected.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("expected {FIELD_COUNT} tab-separated fields, found {fields}")]
    MalformedLine { fields: usize },
    #[error("unsupported device type {device_type:?}")]
    UnsupportedDevice { device_type: String },
    #[error("invalid {field} {value:?}")]
    MalformedCoordinate { field: &'static str, value: String },
    #[error("cannot encode payload: {0}")]
    Encode(#[from] postcard::Error),
}

/// Parse one line against the configured shard set.
///
/// # Errors
///
/// Returns a [`ParseError`] when the field count is wrong, the device type is not
/// a configured shard, or a coordinate is not a 64-bit float.
pub fn parse_line(line: &str, shards: &ShardMap) -> Result<ParsedRecord, ParseError> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    let [device_type, device_id, lat, lon, apps] = fields[..] else {
        return Err(ParseError::MalformedLine {
            fields: fields.len(),
        });
    };

    if !shards.contains(device_type) {
        return Err(ParseError::UnsupportedDevice {
            device_type: device_type.to_string(),
        });
    }

    Ok(ParsedRecord {
        device_type: device_type.to_string(),
        device_id: device_id.to_string(),
        latitude: parse_coordinate("latitude", lat)?,
        longitude: parse_coordinate("longitude", lon)?,
        app_ids: parse_app_ids(apps),
    })
}

fn parse_coordinate(field: &'static str, value: &str) -> Result<f64, ParseError> {
    value
        .parse()
        .map_err(|_| ParseError::MalformedCoordinate {
            field,
            value: value.to_string(),
        })
}

/// Split the app list and keep every token that parses as a `u32`, in order.
#[must_use]
pub fn parse_app_ids(raw: &str) -> Vec<u32> {
    raw.split(APP_DELIMITER)
        .filter_map(|token| token.parse().ok())
        .collect()
}

/// Per-kind failure counts of one parser stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParseErrorCounts {
    pub malformed_line: u64,
    pub unsupported_device: u64,
    pub malformed_coordinate: u64,
    pub encode: u64,
    /// Records that parsed but could not be handed to their shard queue.
    pub unroutable: u64,
}

impl ParseErrorCounts {
    fn record(&mut self, err: &ParseError) {
        match err {
            ParseError::MalformedLine { .. } => self.malformed_line += 1,
            ParseError::UnsupportedDevice { .. } => self.unsupported_device += 1,
            ParseError::MalformedCoordinate { .. } => self.malformed_coordinate += 1,
            ParseError::Encode(_) => self.encode += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.malformed_line
            + self.unsupported_device
            + self.malformed_coordinate
            + self.encode
            + self.unroutable
    }
}

/// Final counters published by a parser stage when its intake is exhausted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParserReport {
    pub worker: usize,
    pub routed: u64,
    pub errors: ParseErrorCounts,
}

/// One parser worker bound to the shared intake queue and the shard router.
#[derive(Debug)]
pub struct ParserStage {
    worker: usize,
    shards: Arc<ShardMap>,
    router: ShardRouter,
}

impl ParserStage {
    #[must_use]
    pub fn new(worker: usize, shards: Arc<ShardMap>, router: ShardRouter) -> Self {
        Self {
            worker,
            shards,
            router,
        }
    }

    /// Parse lines until the intake queue is closed and empty.
    ///
    /// Dropping `self` at the end releases this stage's handle on the shard
    /// queues.
    pub fn run(self, intake: Receiver<String>) -> ParserReport {
        let mut report = ParserReport {
            worker: self.worker,
            ..ParserReport::default()
        };

        for line in intake {
            let encoded = parse_line(&line, &self.shards)
                .and_then(|record| record.encode().map_err(ParseError::from));
            match encoded {
                Ok(record) => match self.router.route(record) {
                    Ok(()) => report.routed += 1,
                    Err(e) => {
                        warn!(worker = self.worker, error = %e, "dropping parsed record");
                        report.errors.unroutable += 1;
                    }
                },
                Err(e) => {
                    debug!(worker = self.worker, error = %e, line = %line, "rejected line");
                    report.errors.record(&e);
                }
            }
        }

        debug!(
            worker = self.worker,
            routed = report.routed,
            errors = report.errors.total(),
            "parser stage finished"
        );
        report
    }
}
