//! `LogFilter`: the parsed form of a space-separated query string.
//!
//! `status:200` trims the `status:` prefix, so the filter value is `"200"`.

use std::collections::HashMap;

use crate::errors::PipelineError;
use crate::logs::ProcessedLog;

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    match_all: bool,
    status: Option<String>,
    host: Option<String>,
    service: Option<String>,
    attributes: HashMap<String, String>,
}

impl LogFilter {
    /// Parses `query`, of the form `"service:MyService status:200
    /// @http.path.section:mysection"`. Filtering on `timestamp` or message
    /// content, and wildcards, are not supported.
    pub fn new(query: &str) -> Result<Self, PipelineError> {
        let mut filter = LogFilter::default();
        filter.build(query)?;
        Ok(filter)
    }

    fn build(&mut self, query: &str) -> Result<(), PipelineError> {
        if query == "*" {
            self.match_all = true;
            return Ok(());
        }
        let clauses: Vec<&str> = query.split(' ').collect();
        if clauses.is_empty() || query.is_empty() {
            return Err(PipelineError::InvalidAggregationQuery(query.to_string()));
        }
        for clause in clauses {
            if let Some(value) = clause.strip_prefix("status:") {
                self.status = Some(value.to_string());
            } else if let Some(value) = clause.strip_prefix("host:") {
                self.host = Some(value.to_string());
            } else if let Some(value) = clause.strip_prefix("service:") {
                self.service = Some(value.to_string());
            } else if let Some(rest) = clause.strip_prefix('@') {
                let parts: Vec<&str> = rest.split(':').collect();
                if parts.len() != 2 {
                    return Err(PipelineError::InvalidAggregationQuery(query.to_string()));
                }
                self.attributes
                    .insert(parts[0].to_string(), parts[1].to_string());
            } else {
                return Err(PipelineError::InvalidAggregationQuery(query.to_string()));
            }
        }
        Ok(())
    }

    pub fn matches(&self, log: &ProcessedLog) -> bool {
        if self.match_all {
            return true;
        }
        self.matches_top_level(log) && self.matches_attributes(log)
    }

    fn matches_top_level(&self, log: &ProcessedLog) -> bool {
        if let Some(status) = &self.status {
            if status != &log.status {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if host != &log.host {
                return false;
            }
        }
        if let Some(service) = &self.service {
            if service != &log.service {
                return false;
            }
        }
        true
    }

    fn matches_attributes(&self, log: &ProcessedLog) -> bool {
        self.attributes
            .iter()
            .all(|(path, value)| log.has_attribute_with_value(path, value))
    }
}
