//! Per-request error report accumulated by the media pipeline.
//!
//! Stages record short human-readable messages under well-known sections
//! (`storage`, `transcoder`, `reason`, ...); an inner stage that knows the
//! user-facing status sets `_http_resp_code`. The report serializes to the
//! JSON error body returned by the API layer.

use std::collections::BTreeMap;

use serde::Serialize;

/// Well-known report section names.
pub mod section {
    pub const STORAGE: &str = "storage";
    pub const TRANSCODER: &str = "transcoder";
    pub const REASON: &str = "reason";
    pub const BODY: &str = "body";
    pub const INTERNAL: &str = "internal";
    pub const RESOURCE_ID: &str = "resource_id";
    pub const REQ_SEQ: &str = "req_seq";
    pub const TYPE: &str = "type";
    pub const USR_ID: &str = "usr_id";
}

/// Structured error dictionary carried through one request or pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorReport {
    #[serde(flatten)]
    sections: BTreeMap<String, String>,
    #[serde(rename = "_http_resp_code", skip_serializing_if = "Option::is_none")]
    http_resp_code: Option<u16>,
}

impl ErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message under a section, replacing any previous message
    /// in the same section.
    pub fn set<S: Into<String>, M: Into<String>>(&mut self, section: S, msg: M) {
        self.sections.insert(section.into(), msg.into());
    }

    pub fn get(&self, section: &str) -> Option<&str> {
        self.sections.get(section).map(String::as_str)
    }

    /// True when no stage has recorded anything.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Set the user-facing HTTP status chosen by an inner stage.
    pub fn set_status(&mut self, code: u16) {
        self.http_resp_code = Some(code);
    }

    pub fn status(&self) -> Option<u16> {
        self.http_resp_code
    }

    /// Convenience: record a message and the status in one call.
    pub fn fail<S: Into<String>, M: Into<String>>(&mut self, section: S, msg: M, code: u16) {
        self.set(section, msg);
        self.set_status(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_sections() {
        let mut report = ErrorReport::new();
        assert!(report.is_empty());

        report.set(section::STORAGE, "file disappeared mid-transfer");
        assert!(!report.is_empty());
        assert_eq!(
            report.get(section::STORAGE),
            Some("file disappeared mid-transfer")
        );
        assert_eq!(report.get(section::TRANSCODER), None);
    }

    #[test]
    fn test_report_status_serialization() {
        let mut report = ErrorReport::new();
        report.fail(section::RESOURCE_ID, "NOT allowed to use the ID", 403);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["resource_id"], "NOT allowed to use the ID");
        assert_eq!(json["_http_resp_code"], 403);
    }

    #[test]
    fn test_report_without_status_omits_code() {
        let mut report = ErrorReport::new();
        report.set(section::REASON, "invalid query");
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("_http_resp_code"));
    }
}
