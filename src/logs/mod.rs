//! The structured log record produced by the processing stage and read by
//! everything downstream: attribute tree, dot-path lookup, filter and
//! measure parsing.

mod filter;
mod measure;
pub mod transform;

pub use filter::LogFilter;
pub use measure::LogMeasure;

use std::collections::HashMap;

/// One node of the recursive `attributes` tree: either a leaf string value
/// or a nested subtree.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Leaf(String),
    Tree(HashMap<String, AttrValue>),
}

pub type AttrMap = HashMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedLog {
    pub event_ts: i64,
    pub status: String,
    pub host: String,
    pub service: String,
    pub message: String,
    pub attributes: AttrMap,
}

impl ProcessedLog {
    /// Looks up `path` against the well-known top-level fields first, then
    /// descends the attribute tree one dot-separated segment at a time.
    /// Any mismatch (missing key, or a non-subtree interior node) yields
    /// `None` ("absent").
    pub fn get_attribute(&self, path: &str) -> Option<String> {
        match path.to_ascii_lowercase().as_str() {
            "status" => return Some(self.status.clone()),
            "host" => return Some(self.host.clone()),
            "service" => return Some(self.service.clone()),
            "message" => return Some(self.message.clone()),
            "timestamp" => return Some(self.event_ts.to_string()),
            _ => {}
        }
        let segments: Vec<&str> = path.split('.').collect();
        Self::walk(&self.attributes, &segments)
    }

    fn walk(map: &AttrMap, segments: &[&str]) -> Option<String> {
        let (head, rest) = segments.split_first()?;
        match map.get(*head)? {
            AttrValue::Leaf(v) => {
                if rest.is_empty() {
                    Some(v.clone())
                } else {
                    None
                }
            }
            AttrValue::Tree(sub) => {
                if rest.is_empty() {
                    None
                } else {
                    Self::walk(sub, rest)
                }
            }
        }
    }

    pub fn has_attribute_with_value(&self, path: &str, want: &str) -> bool {
        self.get_attribute(path).as_deref() == Some(want)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> ProcessedLog {
        let mut nested3 = AttrMap::new();
        nested3.insert("aMeasurableAttribute".into(), AttrValue::Leaf("4".into()));

        let mut nested2 = AttrMap::new();
        nested2.insert("aMeasurableAttribute".into(), AttrValue::Leaf("3".into()));
        nested2.insert("nested".into(), AttrValue::Tree(nested3));

        let mut nested1 = AttrMap::new();
        nested1.insert("aMeasurableAttribute".into(), AttrValue::Leaf("2".into()));
        nested1.insert("nested".into(), AttrValue::Tree(nested2));

        let mut attrs = AttrMap::new();
        attrs.insert("aMeasurableAttribute".into(), AttrValue::Leaf("1".into()));
        attrs.insert("nested".into(), AttrValue::Tree(nested1));

        ProcessedLog {
            event_ts: 123456789,
            status: "200".into(),
            host: "aHost".into(),
            service: "aService".into(),
            message: "aMessage".into(),
            attributes: attrs,
        }
    }

    #[test]
    fn well_known_fields_are_reachable_by_path() {
        let log = fixture();
        assert_eq!(log.get_attribute("timestamp").as_deref(), Some("123456789"));
        assert_eq!(log.get_attribute("status").as_deref(), Some("200"));
        assert_eq!(log.get_attribute("host").as_deref(), Some("aHost"));
        assert_eq!(log.get_attribute("service").as_deref(), Some("aService"));
        assert_eq!(log.get_attribute("message").as_deref(), Some("aMessage"));
    }

    #[test]
    fn nested_paths_descend_one_segment_at_a_time() {
        let log = fixture();
        assert_eq!(log.get_attribute("aMeasurableAttribute").as_deref(), Some("1"));
        assert_eq!(
            log.get_attribute("nested.aMeasurableAttribute").as_deref(),
            Some("2")
        );
        assert_eq!(
            log.get_attribute("nested.nested.aMeasurableAttribute")
                .as_deref(),
            Some("3")
        );
        assert_eq!(
            log.get_attribute("nested.nested.nested.aMeasurableAttribute")
                .as_deref(),
            Some("4")
        );
    }

    #[test]
    fn missing_path_is_absent() {
        let log = fixture();
        assert_eq!(log.get_attribute("aNonExistentAttribute"), None);
        assert_eq!(log.get_attribute("nested.aNonExistentAttribute"), None);
    }

    #[test]
    fn has_attribute_with_value() {
        let log = fixture();
        assert!(log.has_attribute_with_value("timestamp", "123456789"));
        assert!(!log.has_attribute_with_value("timestamp", "23456789"));
        assert!(log.has_attribute_with_value(
            "nested.nested.nested.aMeasurableAttribute",
            "4"
        ));
        assert!(!log.has_attribute_with_value(
            "nested.nested.nested.aMeasurableAttribute",
            "3"
        ));
    }
}
