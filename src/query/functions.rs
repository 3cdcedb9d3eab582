//! SQL scalar functions over verbatim log fields
//!
//! Timestamps and request lines are stored exactly as logged, so the
//! queries need help to compare times and pick apart paths. These are
//! registered on every SQLite connection:
//!
//! | function | returns |
//! |---|---|
//! | `log_epoch(timestamp)` | Unix seconds, NULL if unparseable |
//! | `path_segment(request_line, depth)` | 1-based path segment, NULL if absent |
//! | `referer_domain(referer)` | first three `/`-separated parts |

pub use crate::log::record::log_epoch;
use crate::log::record::request_path;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

/// Segment `depth` (1-based) of the request path, ignoring the query string
///
/// `GET /a/b/c?x=1 HTTP/1.1` at depth 2 is `b`.
pub fn path_segment(request_line: &str, depth: usize) -> Option<&str> {
    let index = depth.checked_sub(1)?;
    let path = request_path(request_line)?;
    let path = path.split(['?', '#']).next()?;
    path.split('/').filter(|s| !s.is_empty()).nth(index)
}

/// Scheme and host part of a referer
///
/// `http://example.com/x` becomes `http://example.com`; values with fewer
/// than three parts are returned whole.
pub fn referer_domain(referer: &str) -> String {
    referer.splitn(4, '/').take(3).collect::<Vec<_>>().join("/")
}

/// Register the helper functions on `conn`
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("log_epoch", 1, flags, |ctx| {
        let timestamp = ctx.get::<Option<String>>(0)?;
        Ok(timestamp.as_deref().and_then(log_epoch))
    })?;

    conn.create_scalar_function("path_segment", 2, flags, |ctx| {
        let request_line = ctx.get::<Option<String>>(0)?;
        let depth = usize::try_from(ctx.get::<i64>(1)?).ok();
        Ok(match (request_line, depth) {
            (Some(line), Some(depth)) => path_segment(&line, depth).map(str::to_string),
            _ => None,
        })
    })?;

    conn.create_scalar_function("referer_domain", 1, flags, |ctx| {
        let referer = ctx.get::<Option<String>>(0)?;
        Ok(referer.map(|r| referer_domain(&r)))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_epoch() {
        // 13:55:36 -0700 is 20:55:36 UTC
        assert_eq!(log_epoch("10/Oct/2023:13:55:36 -0700"), Some(1_696_971_336));
        assert_eq!(log_epoch("10/Oct/2023:20:55:36 +0000"), Some(1_696_971_336));
        assert_eq!(log_epoch("not a time"), None);
        assert_eq!(log_epoch("32/Oct/2023:13:55:36 -0700"), None);
    }

    #[test]
    fn test_path_segment() {
        let line = "GET /a/b/c?x=1 HTTP/1.1";
        assert_eq!(path_segment(line, 1), Some("a"));
        assert_eq!(path_segment(line, 3), Some("c"));
        assert_eq!(path_segment(line, 4), None);
        assert_eq!(path_segment(line, 0), None);
        assert_eq!(path_segment("GET //api//v1 HTTP/1.1", 2), Some("v1"));
    }

    #[test]
    fn test_referer_domain() {
        assert_eq!(referer_domain("http://example.com/x"), "http://example.com");
        assert_eq!(referer_domain("https://example.com/a/b/c"), "https://example.com");
        assert_eq!(referer_domain("https://example.com"), "https://example.com");
        assert_eq!(referer_domain("-"), "-");
        assert_eq!(referer_domain(""), "");
    }

    #[test]
    fn test_registered_functions() {
        let conn = Connection::open_in_memory().unwrap();
        register_functions(&conn).unwrap();

        let (epoch, segment, domain): (Option<i64>, Option<String>, String) = conn
            .query_row(
                "SELECT log_epoch('10/Oct/2023:13:55:36 -0700'),
                        path_segment('GET /a/b/c HTTP/1.1', 2),
                        referer_domain('http://example.com/x')",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(epoch, Some(1_696_971_336));
        assert_eq!(segment.as_deref(), Some("b"));
        assert_eq!(domain, "http://example.com");

        let missing: Option<i64> = conn
            .query_row("SELECT log_epoch('garbage')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(missing, None);
    }
}
