//! Access-log line parser
//!
//! Recognized format:
//!
//! ```text
//! <client> (<forwarded_for>) - - [<timestamp>] "<request>" <status> <size> <time_taken> <worker> "<referer>" "<user_agent>"
//! ```
//!
//! The match is anchored at the start of the line; anything after the
//! closing user-agent quote is ignored. The timestamp must also be a real
//! calendar time, so every stored record can be placed in a time window.

use crate::error::ParseError;
use crate::log::record::{log_epoch, Record};
use regex::{Captures, Regex};
use std::str::FromStr;
use std::sync::LazyLock;

/// Regex for a single access-log line
///
/// Numeric groups use `[0-9]` rather than `\d`, which would accept any
/// Unicode digit.
static LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"^(?P<client_address>\S+) "#,
        r#"\((?P<forwarded_for>\S+)\) - - "#,
        r#"\[(?P<timestamp>[0-9]{2}/[A-Za-z]{3}/[0-9]{4}:[0-9]{2}:[0-9]{2}:[0-9]{2} [+\-][0-9]{4})\] "#,
        r#""(?P<request_line>[A-Z]+ \S+ \S+)" "#,
        r#"(?P<status_code>[0-9]+) "#,
        r#"(?P<response_size>[0-9]+) "#,
        r#"(?P<time_taken>[0-9]+) "#,
        r#"(?P<upstream_worker_name>[0-9]+) "#,
        r#""(?P<referer>[^"]*)" "#,
        r#""(?P<user_agent>[^"]*)""#,
    ))
    .expect("Invalid access-log regex")
});

/// Parse one raw log line into a [`Record`]
///
/// Trailing `\r`/`\n` are stripped first. Returns an error for lines that do
/// not match the grammar or whose numeric fields overflow; never produces a
/// partially populated record.
pub fn parse_line(line: &str) -> Result<Record, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let caps = LINE_REGEX.captures(line).ok_or(ParseError::Malformed)?;
    let timestamp = text(&caps, "timestamp");
    if log_epoch(&timestamp).is_none() {
        return Err(ParseError::Malformed);
    }

    Ok(Record {
        client_address: text(&caps, "client_address"),
        forwarded_for: text(&caps, "forwarded_for"),
        timestamp,
        request_line: text(&caps, "request_line"),
        status_code: number(&caps, "status_code")?,
        response_size: number(&caps, "response_size")?,
        time_taken: number(&caps, "time_taken")?,
        upstream_worker_name: text(&caps, "upstream_worker_name"),
        referer: text(&caps, "referer"),
        user_agent: text(&caps, "user_agent"),
    })
}

/// Parse raw line bytes, rejecting invalid UTF-8
pub fn parse_bytes(line: &[u8]) -> Result<Record, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
    parse_line(line)
}

fn text(caps: &Captures<'_>, name: &str) -> String {
    caps.name(name).map(|m| m.as_str().to_string()).unwrap_or_default()
}

fn number<T: FromStr>(caps: &Captures<'_>, name: &'static str) -> Result<T, ParseError> {
    let raw = caps.name(name).map(|m| m.as_str()).unwrap_or_default();
    raw.parse::<T>().map_err(|_| ParseError::InvalidNumber {
        field: name,
        value: raw.to_string(),
    })
}
