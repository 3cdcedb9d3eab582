//! Analytics operations over an imported destination
//!
//! Only the relational backend can answer these; constructing an engine on
//! any other backend fails with [`QueryError::Unsupported`].

use crate::db::sqlite::record_from_row;
use crate::db::{Backend, Connection, SqliteBackend};
use crate::error::{QueryError, QueryResult};
use crate::log::Record;
use crate::query::catalog::{self, QueryDef};
use crate::query::rows::{DomainGroupCount, GroupCount, PeriodCount, SortField};
use chrono::{DateTime, Utc};
use rusqlite::{named_params, Row, ToSql};
use tracing::debug;

/// Longest accepted look-back window (about ten years)
const MAX_WINDOW_SECS: u64 = 10 * 366 * 24 * 60 * 60;

/// Runs the fixed query set against one destination
pub struct QueryEngine<'c> {
    db: &'c SqliteBackend,
    table: String,
    reference: DateTime<Utc>,
}

impl<'c> QueryEngine<'c> {
    /// Bind to a connection's destination
    pub fn new(conn: &'c Connection) -> QueryResult<Self> {
        match conn.backend() {
            Backend::Relational(db) => Ok(Self {
                db,
                table: conn.destination().quoted(),
                reference: Utc::now(),
            }),
            #[allow(unreachable_patterns)]
            other => Err(QueryError::Unsupported {
                backend: other.kind(),
            }),
        }
    }

    /// Measure windows back from `now` instead of the current time
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference = now;
        self
    }

    /// Time windows are measured back from this instant
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference
    }

    /// Most frequent (forwarded_for, user_agent, referer, worker) groups
    pub fn top_ip_user_agent_combos(&self, limit: usize) -> QueryResult<Vec<GroupCount>> {
        let limit = check_limit(limit)?;
        self.run(&catalog::TOP_COMBOS, None, named_params! { ":limit": limit }, GroupCount::from_row)
    }

    /// Group counts for requests in the last `window_minutes`
    pub fn request_frequency(&self, window_minutes: u64) -> QueryResult<Vec<GroupCount>> {
        let since = self.since("window_minutes", window_minutes, 60)?;
        self.run(&catalog::REQUEST_FREQUENCY, None, named_params! { ":since": since }, GroupCount::from_row)
    }

    /// Most frequent user agents with their grouping key
    pub fn top_user_agents(&self, limit: usize) -> QueryResult<Vec<GroupCount>> {
        let limit = check_limit(limit)?;
        self.run(&catalog::TOP_USER_AGENTS, None, named_params! { ":limit": limit }, GroupCount::from_row)
    }

    /// Group counts for statuses starting with `status_prefix` in the last
    /// `window_minutes`
    pub fn server_errors_in_window(
        &self,
        status_prefix: &str,
        window_minutes: u64,
    ) -> QueryResult<Vec<GroupCount>> {
        check_status_prefix(status_prefix)?;
        let since = self.since("window_minutes", window_minutes, 60)?;
        self.run(
            &catalog::SERVER_ERRORS,
            None,
            named_params! { ":prefix": status_prefix, ":since": since },
            GroupCount::from_row,
        )
    }

    /// The `limit` slowest requests, or fastest when `longest` is false
    pub fn extreme_latency_queries(&self, limit: usize, longest: bool) -> QueryResult<Vec<Record>> {
        let limit = check_limit(limit)?;
        let order = if longest {
            "time_taken DESC, id"
        } else {
            "time_taken ASC, id"
        };
        self.run(&catalog::EXTREME_LATENCY, Some(order), named_params! { ":limit": limit }, record_from_row)
    }

    /// Group counts for requests whose path segment at `depth` (1-based)
    /// equals `match_segment`
    pub fn top_requests_at_path_depth(
        &self,
        limit: usize,
        depth: usize,
        match_segment: &str,
    ) -> QueryResult<Vec<GroupCount>> {
        let limit = check_limit(limit)?;
        if depth == 0 || depth > 1024 {
            return Err(invalid("depth", "must be between 1 and 1024"));
        }
        if match_segment.is_empty() || match_segment.contains('/') {
            return Err(invalid("segment", "must be a non-empty path segment without '/'"));
        }
        let depth = depth as i64;
        self.run(
            &catalog::PATH_DEPTH,
            None,
            named_params! { ":limit": limit, ":depth": depth, ":segment": match_segment },
            GroupCount::from_row,
        )
    }

    /// Group counts across every request
    pub fn counts_by_upstream_worker(&self) -> QueryResult<Vec<GroupCount>> {
        self.run(&catalog::UPSTREAM_COUNTS, None, &[], GroupCount::from_row)
    }

    /// Group counts with the referer's domain, sorted by `sort`
    pub fn conversion_statistics(&self, sort: SortField) -> QueryResult<Vec<DomainGroupCount>> {
        self.run(
            &catalog::CONVERSION_STATS,
            Some(sort.order_clause()),
            &[],
            DomainGroupCount::from_row,
        )
    }

    /// Every request in the last `window_seconds`, oldest first
    ///
    /// The boundary is inclusive: a request exactly `window_seconds` before
    /// the reference time is returned.
    pub fn requests_in_window(&self, window_seconds: u64) -> QueryResult<Vec<Record>> {
        let since = self.since("window_seconds", window_seconds, 1)?;
        self.run(&catalog::REQUESTS_IN_WINDOW, None, named_params! { ":since": since }, record_from_row)
    }

    /// Minutes with the most requests
    pub fn largest_request_periods(&self, limit: usize) -> QueryResult<Vec<PeriodCount>> {
        let limit = check_limit(limit)?;
        self.run(&catalog::BUSIEST_MINUTES, None, named_params! { ":limit": limit }, PeriodCount::from_row)
    }

    fn run<T>(
        &self,
        query: &QueryDef,
        order: Option<&str>,
        params: &[(&str, &dyn ToSql)],
        decode: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> QueryResult<Vec<T>> {
        let sql = catalog::render(query, &self.table, order);
        debug!(query = query.id, table = %self.table, "Running query");

        let rows = self.db.query_map(&sql, params, decode)?;
        debug!(query = query.id, rows = rows.len(), "Query complete");
        Ok(rows)
    }

    /// Unix seconds `amount * unit_secs` before the reference time
    fn since(&self, name: &str, amount: u64, unit_secs: u64) -> QueryResult<i64> {
        let secs = amount
            .checked_mul(unit_secs)
            .filter(|s| (1..=MAX_WINDOW_SECS).contains(s))
            .ok_or_else(|| invalid(name, "window must be positive and at most ten years"))?;
        Ok(self.reference.timestamp() - secs as i64)
    }
}

fn invalid(name: &str, reason: &str) -> QueryError {
    QueryError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// A limit above the row count returns every row
fn check_limit(limit: usize) -> QueryResult<i64> {
    if limit == 0 {
        return Err(invalid("limit", "limit must be at least 1"));
    }
    Ok(i64::try_from(limit).unwrap_or(i64::MAX))
}

fn check_status_prefix(prefix: &str) -> QueryResult<()> {
    let valid = (1..=3).contains(&prefix.len()) && prefix.bytes().all(|b| b.is_ascii_digit());
    if !valid {
        return Err(invalid("status_prefix", "expected 1 to 3 ASCII digits"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BackendConfig, RecordSink};
    use chrono::TimeZone;

    /// 2023-10-10 21:00:00 UTC
    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 10, 10, 21, 0, 0).unwrap()
    }

    fn rec(ff: &str, ua: &str, worker: &str, status: u32, time_taken: u64, ts: &str, path: &str) -> Record {
        Record {
            client_address: "203.0.113.9".into(),
            forwarded_for: ff.into(),
            timestamp: ts.into(),
            request_line: format!("GET {} HTTP/1.1", path),
            status_code: status,
            response_size: 512,
            time_taken,
            upstream_worker_name: worker.into(),
            referer: "http://example.com/x".into(),
            user_agent: ua.into(),
        }
    }

    fn connection(records: &[Record]) -> Connection {
        let mut conn = crate::db::connect(&BackendConfig::sqlite(":memory:"), "import").unwrap();
        conn.ensure_schema().unwrap();
        let outcome = conn.write_batch(records);
        assert_eq!(outcome.written, records.len() as u64);
        conn
    }

    fn sample() -> Vec<Record> {
        vec![
            // 20:55:36Z
            rec("198.51.100.4", "TestAgent/1.0", "7", 200, 45, "10/Oct/2023:13:55:36 -0700", "/a/b/c"),
            rec("198.51.100.4", "TestAgent/1.0", "7", 500, 900, "10/Oct/2023:13:55:50 -0700", "/a/x"),
            rec("198.51.100.4", "TestAgent/1.0", "7", 503, 300, "10/Oct/2023:20:56:10 +0000", "/api/b"),
            rec("192.0.2.1", "curl/8.0", "3", 404, 5, "10/Oct/2023:20:57:00 +0000", "/z/b"),
            // two hours earlier
            rec("192.0.2.1", "curl/8.0", "3", 502, 12, "10/Oct/2023:19:00:00 +0000", "/a/b"),
        ]
    }

    #[test]
    fn test_single_line_scenario() {
        let line = r#"203.0.113.9 (198.51.100.4) - - [10/Oct/2023:13:55:36 -0700] "GET /a/b/c HTTP/1.1" 200 512 45 7 "http://example.com/x" "TestAgent/1.0""#;
        let record = crate::log::parse_line(line).unwrap();
        let conn = connection(&[record]);

        let groups = QueryEngine::new(&conn).unwrap().counts_by_upstream_worker().unwrap();
        assert_eq!(
            groups,
            vec![GroupCount {
                forwarded_for: "198.51.100.4".into(),
                user_agent: "TestAgent/1.0".into(),
                referer: "http://example.com/x".into(),
                upstream_worker_name: "7".into(),
                count: 1,
            }]
        );
    }

    #[test]
    fn test_top_combos_ordered_and_limited() {
        let conn = connection(&sample());
        let engine = QueryEngine::new(&conn).unwrap();

        let top = engine.top_ip_user_agent_combos(10).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].forwarded_for, "198.51.100.4");
        assert_eq!(top[0].count, 3);
        assert_eq!(top[1].count, 2);

        assert_eq!(engine.top_ip_user_agent_combos(1).unwrap().len(), 1);
        assert_eq!(engine.top_user_agents(1).unwrap()[0].user_agent, "TestAgent/1.0");
    }

    #[test]
    fn test_extreme_latency() {
        let conn = connection(&sample());
        let engine = QueryEngine::new(&conn).unwrap();

        let slow: Vec<u64> = engine
            .extreme_latency_queries(2, true)
            .unwrap()
            .iter()
            .map(|r| r.time_taken)
            .collect();
        assert_eq!(slow, vec![900, 300]);

        let fast: Vec<u64> = engine
            .extreme_latency_queries(100, false)
            .unwrap()
            .iter()
            .map(|r| r.time_taken)
            .collect();
        assert_eq!(fast, vec![5, 12, 45, 300, 900]);
    }

    #[test]
    fn test_requests_in_window_boundary_inclusive() {
        let conn = connection(&[
            rec("a", "ua", "1", 200, 1, "10/Oct/2023:20:59:30 +0000", "/"),
            rec("b", "ua", "1", 200, 1, "10/Oct/2023:20:59:29 +0000", "/"),
            rec("c", "ua", "1", 200, 1, "10/Oct/2023:13:59:45 -0700", "/"),
        ]);
        let engine = QueryEngine::new(&conn).unwrap().with_reference_time(reference());

        let rows = engine.requests_in_window(30).unwrap();
        let clients: Vec<&str> = rows.iter().map(|r| r.forwarded_for.as_str()).collect();
        assert_eq!(clients, vec!["a", "c"]);

        assert_eq!(engine.requests_in_window(300).unwrap().len(), 3);
    }

    #[test]
    fn test_request_frequency_window() {
        let conn = connection(&sample());
        let engine = QueryEngine::new(&conn).unwrap().with_reference_time(reference());

        let recent = engine.request_frequency(60).unwrap();
        let total: u64 = recent.iter().map(|g| g.count).sum();
        assert_eq!(total, 4);

        let all: u64 = engine.request_frequency(180).unwrap().iter().map(|g| g.count).sum();
        assert_eq!(all, 5);
    }

    #[test]
    fn test_server_errors_in_window() {
        let conn = connection(&sample());
        let engine = QueryEngine::new(&conn).unwrap().with_reference_time(reference());

        let errors = engine.server_errors_in_window("5", 60).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].forwarded_for, "198.51.100.4");
        assert_eq!(errors[0].count, 2);

        // the 502 is outside one hour but inside three
        let wider: u64 = engine
            .server_errors_in_window("5", 180)
            .unwrap()
            .iter()
            .map(|g| g.count)
            .sum();
        assert_eq!(wider, 3);

        assert_eq!(engine.server_errors_in_window("404", 60).unwrap()[0].count, 1);
    }

    #[test]
    fn test_server_errors_rejects_bad_prefix() {
        let conn = connection(&sample());
        let engine = QueryEngine::new(&conn).unwrap();
        for prefix in ["", "5%", "5000", "x"] {
            let err = engine.server_errors_in_window(prefix, 60).unwrap_err();
            assert!(matches!(err, QueryError::InvalidParameter { .. }), "{}", prefix);
        }
    }

    #[test]
    fn test_path_depth() {
        let conn = connection(&sample());
        let engine = QueryEngine::new(&conn).unwrap();

        // /a/b/c, /api/b, /z/b and /a/b have "b" at depth 2; /a/x does not
        let total: u64 = engine
            .top_requests_at_path_depth(10, 2, "b")
            .unwrap()
            .iter()
            .map(|g| g.count)
            .sum();
        assert_eq!(total, 4);

        assert!(engine.top_requests_at_path_depth(10, 3, "b").unwrap().is_empty());
        assert!(engine.top_requests_at_path_depth(10, 0, "b").is_err());
        assert!(engine.top_requests_at_path_depth(10, 1, "a/b").is_err());
    }

    #[test]
    fn test_conversion_statistics() {
        let mut records = sample();
        records[3].referer = "https://search.example.org/q?x=1".into();
        let conn = connection(&records);
        let engine = QueryEngine::new(&conn).unwrap();

        let by_count = engine.conversion_statistics(SortField::Count).unwrap();
        assert_eq!(by_count[0].domain, "http://example.com");
        assert_eq!(by_count[0].count, 3);

        let by_domain = engine.conversion_statistics(SortField::Domain).unwrap();
        let domains: Vec<&str> = by_domain.iter().map(|g| g.domain.as_str()).collect();
        assert_eq!(
            domains,
            vec!["http://example.com", "http://example.com", "https://search.example.org"]
        );
    }

    #[test]
    fn test_largest_request_periods() {
        let conn = connection(&sample());
        let engine = QueryEngine::new(&conn).unwrap();

        let periods = engine.largest_request_periods(10).unwrap();
        // 13:55:36 -0700 and 13:55:50 -0700 share the UTC minute 20:55
        assert_eq!(periods[0].period, "2023-10-10 20:55");
        assert_eq!(periods[0].count, 2);
        assert_eq!(periods.len(), 4);
        assert_eq!(engine.largest_request_periods(1).unwrap().len(), 1);
    }

    #[test]
    fn test_periods_normalize_offsets() {
        let mut records = sample();
        records[0].timestamp = "10/Oct/2023:20:56:20 +0000".into();
        records[1].timestamp = "11/Oct/2023:02:26:40 +0530".into();
        let conn = connection(&records);
        let engine = QueryEngine::new(&conn).unwrap();

        let periods = engine.largest_request_periods(10).unwrap();
        assert_eq!(periods[0].period, "2023-10-10 20:56");
        assert_eq!(periods[0].count, 3);
        assert_eq!(periods.len(), 3);
    }

    #[test]
    fn test_limit_bounds() {
        let conn = connection(&sample());
        let engine = QueryEngine::new(&conn).unwrap();
        assert!(engine.top_ip_user_agent_combos(0).is_err());
        assert_eq!(engine.top_ip_user_agent_combos(20_000).unwrap().len(), 2);
        assert!(engine.top_ip_user_agent_combos(usize::MAX).is_ok());
        assert_eq!(engine.extreme_latency_queries(20_000, true).unwrap().len(), sample().len());
        assert!(engine.request_frequency(0).is_err());
        assert!(engine.requests_in_window(u64::MAX).is_err());
    }

    #[test]
    fn test_empty_destination() {
        let conn = connection(&[]);
        let engine = QueryEngine::new(&conn).unwrap();
        assert!(engine.counts_by_upstream_worker().unwrap().is_empty());
        assert!(engine.extreme_latency_queries(5, true).unwrap().is_empty());
    }

    #[cfg(feature = "document")]
    #[test]
    fn test_document_backend_unsupported() {
        use crate::db::DocumentBackend;

        let backend = Backend::Document(DocumentBackend::temporary().unwrap());
        let conn = Connection::from_backend(backend, "import").unwrap();
        let err = QueryEngine::new(&conn).err().unwrap();
        assert!(matches!(
            err,
            QueryError::Unsupported {
                backend: crate::db::BackendKind::Document
            }
        ));
    }
}
