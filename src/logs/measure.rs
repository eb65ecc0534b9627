//! `LogMeasure`: resolves a numeric attribute from a log, replacing the
//! default count-of-1.

use crate::logs::ProcessedLog;

#[derive(Debug, Clone)]
pub struct LogMeasure {
    name: String,
}

impl LogMeasure {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves the measure's attribute path against `log`. Non-integer
    /// contents, or a missing path, both yield `None`.
    pub fn measure(&self, log: &ProcessedLog) -> Option<i64> {
        log.get_attribute(&self.name)?.parse().ok()
    }
}
