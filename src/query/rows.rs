//! Typed result rows
//!
//! Every row is decoded from SQLite by column name and printed by column
//! name, so a reordered SELECT can never mislabel a value.

use crate::log::Record;
use rusqlite::Row;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A count for one (forwarded_for, user_agent, referer, upstream_worker_name) group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub forwarded_for: String,
    pub user_agent: String,
    pub referer: String,
    pub upstream_worker_name: String,
    pub count: u64,
}

impl GroupCount {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            forwarded_for: row.get("forwarded_for")?,
            user_agent: row.get("user_agent")?,
            referer: row.get("referer")?,
            upstream_worker_name: row.get("upstream_worker_name")?,
            count: row.get("count")?,
        })
    }
}

/// A group count with the referer's domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainGroupCount {
    pub forwarded_for: String,
    pub user_agent: String,
    pub referer: String,
    pub upstream_worker_name: String,
    pub domain: String,
    pub count: u64,
}

impl DomainGroupCount {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            forwarded_for: row.get("forwarded_for")?,
            user_agent: row.get("user_agent")?,
            referer: row.get("referer")?,
            upstream_worker_name: row.get("upstream_worker_name")?,
            domain: row.get("domain")?,
            count: row.get("count")?,
        })
    }
}

/// Requests in one minute (`dd/Mon/yyyy:HH:mm`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodCount {
    pub period: String,
    pub count: u64,
}

impl PeriodCount {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            period: row.get("period")?,
            count: row.get("count")?,
        })
    }
}

/// Sort key for conversion statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    /// Largest groups first
    #[default]
    Count,
    Domain,
    ForwardedFor,
    UserAgent,
    Referer,
    UpstreamWorker,
}

impl SortField {
    /// ORDER BY clause, with the grouping key as tie-breaker
    pub(crate) fn order_clause(&self) -> &'static str {
        match self {
            SortField::Count => {
                "count DESC, domain, forwarded_for, user_agent, referer, upstream_worker_name"
            }
            SortField::Domain => {
                "domain, count DESC, forwarded_for, user_agent, referer, upstream_worker_name"
            }
            SortField::ForwardedFor => {
                "forwarded_for, count DESC, domain, user_agent, referer, upstream_worker_name"
            }
            SortField::UserAgent => {
                "user_agent, count DESC, domain, forwarded_for, referer, upstream_worker_name"
            }
            SortField::Referer => {
                "referer, count DESC, domain, forwarded_for, user_agent, upstream_worker_name"
            }
            SortField::UpstreamWorker => {
                "upstream_worker_name, count DESC, domain, forwarded_for, user_agent, referer"
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SortField::Count => "count",
            SortField::Domain => "domain",
            SortField::ForwardedFor => "forwarded_for",
            SortField::UserAgent => "user_agent",
            SortField::Referer => "referer",
            SortField::UpstreamWorker => "upstream_worker_name",
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "count" => Ok(SortField::Count),
            "domain" => Ok(SortField::Domain),
            "forwarded_for" | "ip" => Ok(SortField::ForwardedFor),
            "user_agent" => Ok(SortField::UserAgent),
            "referer" => Ok(SortField::Referer),
            "upstream_worker_name" | "upstream_worker" | "worker" => Ok(SortField::UpstreamWorker),
            other => Err(format!(
                "unknown sort field '{}': expected count, domain, forwarded_for, user_agent, referer or upstream_worker_name",
                other
            )),
        }
    }
}

/// A row that can be rendered as a table
pub trait TableRow {
    /// Column names, in display order
    fn headers() -> &'static [&'static str];

    /// Cell values, aligned with `headers`
    fn cells(&self) -> Vec<String>;
}

impl TableRow for GroupCount {
    fn headers() -> &'static [&'static str] {
        &["forwarded_for", "user_agent", "referer", "upstream_worker_name", "count"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.forwarded_for.clone(),
            self.user_agent.clone(),
            self.referer.clone(),
            self.upstream_worker_name.clone(),
            self.count.to_string(),
        ]
    }
}

impl TableRow for DomainGroupCount {
    fn headers() -> &'static [&'static str] {
        &[
            "forwarded_for",
            "user_agent",
            "referer",
            "upstream_worker_name",
            "domain",
            "count",
        ]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.forwarded_for.clone(),
            self.user_agent.clone(),
            self.referer.clone(),
            self.upstream_worker_name.clone(),
            self.domain.clone(),
            self.count.to_string(),
        ]
    }
}

impl TableRow for PeriodCount {
    fn headers() -> &'static [&'static str] {
        &["period", "count"]
    }

    fn cells(&self) -> Vec<String> {
        vec![self.period.clone(), self.count.to_string()]
    }
}

impl TableRow for Record {
    fn headers() -> &'static [&'static str] {
        &Record::FIELD_NAMES
    }

    fn cells(&self) -> Vec<String> {
        self.field_pairs().into_iter().map(|(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_field_parsing() {
        assert_eq!("count".parse::<SortField>(), Ok(SortField::Count));
        assert_eq!("user-agent".parse::<SortField>(), Ok(SortField::UserAgent));
        assert_eq!("worker".parse::<SortField>(), Ok(SortField::UpstreamWorker));
        assert!("id; DROP TABLE import".parse::<SortField>().is_err());
    }

    #[test]
    fn test_headers_match_cells() {
        let group = GroupCount {
            forwarded_for: "a".into(),
            user_agent: "b".into(),
            referer: "c".into(),
            upstream_worker_name: "d".into(),
            count: 3,
        };
        assert_eq!(GroupCount::headers().len(), group.cells().len());
        assert_eq!(group.cells()[4], "3");
        assert_eq!(<Record as TableRow>::headers().len(), 10);
    }
}
