//! Canonical access-log record
//!
//! Field names defined here are the only names used for SQL columns,
//! document keys and Redis hash fields. Everything downstream reads and
//! writes records by name.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// chrono format of the log timestamp (`10/Oct/2023:13:55:36 -0700`)
pub const LOG_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// One normalized access-log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Left-hand client IP token
    pub client_address: String,

    /// Parenthesized proxy-chain token
    pub forwarded_for: String,

    /// Log timestamp, kept verbatim (`dd/Mon/yyyy:HH:mm:ss ±HHMM`)
    pub timestamp: String,

    /// `METHOD PATH PROTOCOL`
    pub request_line: String,

    /// HTTP status
    pub status_code: u32,

    /// Response size in bytes
    pub response_size: u64,

    /// Response time in milliseconds
    pub time_taken: u64,

    /// Load-balancer worker identifier
    pub upstream_worker_name: String,

    /// Referer header (empty when absent)
    pub referer: String,

    /// User-Agent header (empty when absent)
    pub user_agent: String,
}

impl Record {
    /// Canonical field names, in storage column order
    pub const FIELD_NAMES: [&'static str; 10] = [
        "client_address",
        "forwarded_for",
        "timestamp",
        "request_line",
        "status_code",
        "response_size",
        "time_taken",
        "upstream_worker_name",
        "referer",
        "user_agent",
    ];

    /// Field name/value pairs with numbers rendered as decimal strings
    ///
    /// Used by stores that only hold string values (Redis hashes).
    pub fn field_pairs(&self) -> [(&'static str, String); 10] {
        [
            ("client_address", self.client_address.clone()),
            ("forwarded_for", self.forwarded_for.clone()),
            ("timestamp", self.timestamp.clone()),
            ("request_line", self.request_line.clone()),
            ("status_code", self.status_code.to_string()),
            ("response_size", self.response_size.to_string()),
            ("time_taken", self.time_taken.to_string()),
            ("upstream_worker_name", self.upstream_worker_name.clone()),
            ("referer", self.referer.clone()),
            ("user_agent", self.user_agent.clone()),
        ]
    }

    /// Path component of the request line, if present
    pub fn request_path(&self) -> Option<&str> {
        request_path(&self.request_line)
    }
}

/// Parse a log timestamp to Unix seconds
pub fn log_epoch(timestamp: &str) -> Option<i64> {
    DateTime::parse_from_str(timestamp, LOG_TIME_FORMAT)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Extract the path from a `METHOD PATH PROTOCOL` request line
pub fn request_path(request_line: &str) -> Option<&str> {
    request_line.split(' ').nth(1).filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record {
            client_address: "203.0.113.9".into(),
            forwarded_for: "198.51.100.4".into(),
            timestamp: "10/Oct/2023:13:55:36 -0700".into(),
            request_line: "GET /a/b/c HTTP/1.1".into(),
            status_code: 200,
            response_size: 512,
            time_taken: 45,
            upstream_worker_name: "7".into(),
            referer: "http://example.com/x".into(),
            user_agent: "TestAgent/1.0".into(),
        }
    }

    #[test]
    fn test_field_pairs_follow_canonical_names() {
        let pairs = sample().field_pairs();
        let names: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, Record::FIELD_NAMES);
        assert_eq!(pairs[4].1, "200");
        assert_eq!(pairs[7].1, "7");
    }

    #[test]
    fn test_json_keys_match_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), Record::FIELD_NAMES.len());
        for name in Record::FIELD_NAMES {
            assert!(obj.contains_key(name), "missing {}", name);
        }
    }

    #[test]
    fn test_request_path() {
        assert_eq!(sample().request_path(), Some("/a/b/c"));
        assert_eq!(request_path("GET"), None);
    }
}
