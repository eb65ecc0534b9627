//! Error taxonomy for the log/metrics pipeline.
//!
//! Per-record errors (`InvalidCsvFormat`, `InvalidRequestFormat`,
//! `UnableToParseDate`, `UnsampledMetric`, `CouldNotComputeMetricForTag`) are
//! never fatal: they are returned, logged at debug level, and dropped by the
//! stage that produced them. `InvalidAggregationQuery`, `TemplateParse` and
//! `Io` are fatal and propagate out of `Component::start`/`main`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid log line: {0}")]
    InvalidLogLine(String),

    #[error("invalid csv log format, received {received} fields, expected {expected} fields")]
    InvalidCsvFormat { received: usize, expected: usize },

    #[error("invalid request format: {0}")]
    InvalidRequestFormat(String),

    #[error("unable to parse date {date}: {source}")]
    UnableToParseDate {
        date: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid aggregation query: {0}")]
    InvalidAggregationQuery(String),

    #[error("unsampled metric")]
    UnsampledMetric,

    #[error("could not find metric value for tag: {name} with value: {value}")]
    CouldNotComputeMetricForTag { name: String, value: String },

    #[error("failed to parse template: {0}")]
    TemplateParse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
