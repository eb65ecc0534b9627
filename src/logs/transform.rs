//! Reference CSV transform: the one pluggable piece the core treats as an
//! external collaborator (`RawMessage -> Result<Option<ProcessedLog>, _>`).
//!
//! Input schema is the access-log CSV:
//! `"remotehost","rfc931","authuser","date","request","status","bytes"`.
//! The top-level `status` field is populated directly, so `LogFilter`'s
//! `status:` clause and `ProcessedLog::get_attribute("status")` agree with
//! `attributes["status"]`.

use std::collections::HashMap;

use crate::errors::PipelineError;
use crate::input::RawMessage;
use crate::logs::{AttrMap, AttrValue, ProcessedLog};

const HEADER: &str =
    "\"remotehost\",\"rfc931\",\"authuser\",\"date\",\"request\",\"status\",\"bytes\"";
const HEADER_FIELDS: usize = 7;

/// Splits a CSV line on commas and strips surrounding quotes from each
/// field. The access-log format never embeds a comma inside a quoted
/// field, so a plain split (rather than a full `csv::Reader`) is sufficient.
fn split_quoted_fields(line: &str) -> Vec<String> {
    line.split(',')
        .map(|field| field.trim_matches('"').to_string())
        .collect()
}

pub fn csv_access_log(msg: &RawMessage) -> Result<Option<ProcessedLog>, PipelineError> {
    let content = String::from_utf8_lossy(&msg.content);
    if content == HEADER {
        return Ok(None);
    }

    let fields = split_quoted_fields(&content);
    if fields.len() < HEADER_FIELDS {
        return Err(PipelineError::InvalidCsvFormat {
            received: fields.len(),
            expected: HEADER_FIELDS,
        });
    }

    let event_ts: i64 = fields[3]
        .parse()
        .map_err(|source| PipelineError::UnableToParseDate {
            date: fields[3].clone(),
            source,
        })?;

    let request = &fields[4];
    let status = &fields[5];

    let request_parts: Vec<&str> = request.split(' ').collect();
    if request_parts.len() < 3 {
        return Err(PipelineError::InvalidRequestFormat(request.clone()));
    }
    let uri_parts: Vec<&str> = request_parts[1].split('/').collect();
    if uri_parts.len() < 2 {
        return Err(PipelineError::InvalidRequestFormat(request.clone()));
    }

    let mut path_attrs: AttrMap = HashMap::new();
    path_attrs.insert("uri".into(), AttrValue::Leaf(request_parts[1].to_string()));
    path_attrs.insert("section".into(), AttrValue::Leaf(uri_parts[1].to_string()));
    if uri_parts.len() > 2 {
        path_attrs.insert(
            "subsection".into(),
            AttrValue::Leaf(uri_parts[2].to_string()),
        );
    }

    let mut http_attrs: AttrMap = HashMap::new();
    http_attrs.insert("method".into(), AttrValue::Leaf(request_parts[0].to_string()));
    http_attrs.insert(
        "protocol".into(),
        AttrValue::Leaf(request_parts[2].to_string()),
    );
    http_attrs.insert("path".into(), AttrValue::Tree(path_attrs));

    let mut attributes: AttrMap = HashMap::new();
    attributes.insert("rfc931".into(), AttrValue::Leaf(fields[1].clone()));
    attributes.insert("authuser".into(), AttrValue::Leaf(fields[2].clone()));
    attributes.insert("request".into(), AttrValue::Leaf(request.clone()));
    attributes.insert("status".into(), AttrValue::Leaf(status.clone()));
    attributes.insert("bytes".into(), AttrValue::Leaf(fields[6].clone()));
    attributes.insert("http".into(), AttrValue::Tree(http_attrs));

    Ok(Some(ProcessedLog {
        event_ts,
        status: status.clone(),
        host: fields[0].clone(),
        service: String::new(),
        message: content.to_string(),
        attributes,
    }))
}
