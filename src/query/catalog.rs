//! Static query catalog for the analytics operations.
//!
//! Each operation is a SQL template plus its declared parameters.
//! `{table}` is always the validated destination identifier and `{order}`
//! comes from a fixed set of clauses; every user-supplied value is bound as
//! a named SQL parameter, never spliced into the text.

use serde::Serialize;

/// Category of analytics query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    Clients,
    Traffic,
    Errors,
    Latency,
    Paths,
    Upstream,
}

impl QueryCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Clients => "Clients",
            Self::Traffic => "Traffic",
            Self::Errors => "Errors",
            Self::Latency => "Latency",
            Self::Paths => "Paths",
            Self::Upstream => "Upstream",
        }
    }
}

/// Type of a query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Integer,
    Boolean,
    String,
}

/// Definition of a query parameter
#[derive(Debug, Clone, Serialize)]
pub struct ParamDef {
    pub name: &'static str,
    pub description: &'static str,
    pub param_type: ParamType,
    pub default: Option<&'static str>,
}

/// A query definition in the catalog
#[derive(Debug, Clone, Serialize)]
pub struct QueryDef {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: QueryCategory,
    pub sql_template: &'static str,
    pub params: &'static [ParamDef],
}

// ─── Clients ─────────────────────────────────────────────────────

pub const TOP_COMBOS: QueryDef = QueryDef {
    id: "top-combos",
    name: "Top IP / User-Agent Combinations",
    description: "Most frequent forwarded-for, user-agent, referer and worker groups",
    category: QueryCategory::Clients,
    sql_template: "SELECT forwarded_for, user_agent, referer, upstream_worker_name, \
        COUNT(*) AS count \
        FROM {table} \
        GROUP BY forwarded_for, user_agent, referer, upstream_worker_name \
        ORDER BY count DESC, forwarded_for, user_agent, referer, upstream_worker_name \
        LIMIT :limit",
    params: &[PARAM_LIMIT],
};

pub const TOP_USER_AGENTS: QueryDef = QueryDef {
    id: "top-user-agents",
    name: "Top User Agents",
    description: "Most frequent user agents, grouped with client, referer and worker",
    category: QueryCategory::Clients,
    sql_template: "SELECT forwarded_for, user_agent, referer, upstream_worker_name, \
        COUNT(*) AS count \
        FROM {table} \
        GROUP BY forwarded_for, user_agent, referer, upstream_worker_name \
        ORDER BY count DESC, user_agent, forwarded_for, referer, upstream_worker_name \
        LIMIT :limit",
    params: &[PARAM_LIMIT],
};

pub const CONVERSION_STATS: QueryDef = QueryDef {
    id: "conversion-stats",
    name: "Conversion Statistics",
    description: "Group counts with the referring domain",
    category: QueryCategory::Clients,
    sql_template: "SELECT forwarded_for, user_agent, referer, upstream_worker_name, \
        referer_domain(referer) AS domain, COUNT(*) AS count \
        FROM {table} \
        GROUP BY forwarded_for, user_agent, referer, upstream_worker_name, domain \
        ORDER BY {order}",
    params: &[PARAM_SORT],
};

// ─── Traffic ─────────────────────────────────────────────────────

pub const REQUEST_FREQUENCY: QueryDef = QueryDef {
    id: "request-frequency",
    name: "Request Frequency",
    description: "Group counts for requests in the last N minutes",
    category: QueryCategory::Traffic,
    sql_template: "SELECT forwarded_for, user_agent, referer, upstream_worker_name, \
        COUNT(*) AS count \
        FROM {table} \
        WHERE log_epoch(timestamp) >= :since \
        GROUP BY forwarded_for, user_agent, referer, upstream_worker_name \
        ORDER BY count DESC, forwarded_for, user_agent, referer, upstream_worker_name",
    params: &[PARAM_WINDOW_MINUTES],
};

pub const REQUESTS_IN_WINDOW: QueryDef = QueryDef {
    id: "requests-in-window",
    name: "Requests in Window",
    description: "Every request in the last N seconds (30s, 1m and 5m are typical)",
    category: QueryCategory::Traffic,
    sql_template: "SELECT * FROM {table} \
        WHERE log_epoch(timestamp) >= :since \
        ORDER BY log_epoch(timestamp), id",
    params: &[PARAM_WINDOW_SECONDS],
};

pub const BUSIEST_MINUTES: QueryDef = QueryDef {
    id: "busiest-minutes",
    name: "Largest Request Periods",
    description: "UTC minutes with the most requests",
    category: QueryCategory::Traffic,
    // Offsets are normalized, so one instant maps to one period
    sql_template: "SELECT strftime('%Y-%m-%d %H:%M', log_epoch(timestamp) / 60 * 60, 'unixepoch') \
        AS period, COUNT(*) AS count \
        FROM {table} \
        GROUP BY period \
        ORDER BY count DESC, period \
        LIMIT :limit",
    params: &[PARAM_LIMIT],
};

// ─── Errors ──────────────────────────────────────────────────────

pub const SERVER_ERRORS: QueryDef = QueryDef {
    id: "server-errors",
    name: "Server Errors in Window",
    description: "Group counts for statuses starting with a prefix in the last N minutes",
    category: QueryCategory::Errors,
    sql_template: "SELECT forwarded_for, user_agent, referer, upstream_worker_name, \
        COUNT(*) AS count \
        FROM {table} \
        WHERE CAST(status_code AS TEXT) LIKE :prefix || '%' \
        AND log_epoch(timestamp) >= :since \
        GROUP BY forwarded_for, user_agent, referer, upstream_worker_name \
        ORDER BY count DESC, forwarded_for, user_agent, referer, upstream_worker_name",
    params: &[PARAM_STATUS_PREFIX, PARAM_WINDOW_MINUTES],
};

// ─── Latency ─────────────────────────────────────────────────────

pub const EXTREME_LATENCY: QueryDef = QueryDef {
    id: "extreme-latency",
    name: "Extreme Latency",
    description: "Slowest (or fastest) individual requests",
    category: QueryCategory::Latency,
    sql_template: "SELECT * FROM {table} ORDER BY {order} LIMIT :limit",
    params: &[PARAM_LIMIT, PARAM_LONGEST],
};

// ─── Paths ───────────────────────────────────────────────────────

pub const PATH_DEPTH: QueryDef = QueryDef {
    id: "path-depth",
    name: "Top Requests at Path Depth",
    description: "Group counts for requests whose path segment at a depth matches",
    category: QueryCategory::Paths,
    sql_template: "SELECT forwarded_for, user_agent, referer, upstream_worker_name, \
        COUNT(*) AS count \
        FROM {table} \
        WHERE path_segment(request_line, :depth) = :segment \
        GROUP BY forwarded_for, user_agent, referer, upstream_worker_name \
        ORDER BY count DESC, forwarded_for, user_agent, referer, upstream_worker_name \
        LIMIT :limit",
    params: &[PARAM_LIMIT, PARAM_DEPTH, PARAM_SEGMENT],
};

// ─── Upstream ────────────────────────────────────────────────────

pub const UPSTREAM_COUNTS: QueryDef = QueryDef {
    id: "upstream-counts",
    name: "Counts by Upstream Worker",
    description: "Group counts across every request",
    category: QueryCategory::Upstream,
    sql_template: "SELECT forwarded_for, user_agent, referer, upstream_worker_name, \
        COUNT(*) AS count \
        FROM {table} \
        GROUP BY forwarded_for, user_agent, referer, upstream_worker_name \
        ORDER BY count DESC, upstream_worker_name, forwarded_for, user_agent, referer",
    params: &[],
};

// ─── Common parameter definitions ────────────────────────────────

const PARAM_LIMIT: ParamDef = ParamDef {
    name: "limit",
    description: "Maximum rows to return (at least 1)",
    param_type: ParamType::Integer,
    default: Some("10"),
};

const PARAM_WINDOW_MINUTES: ParamDef = ParamDef {
    name: "window_minutes",
    description: "Look-back window in minutes",
    param_type: ParamType::Integer,
    default: Some("60"),
};

const PARAM_WINDOW_SECONDS: ParamDef = ParamDef {
    name: "window_seconds",
    description: "Look-back window in seconds",
    param_type: ParamType::Integer,
    default: Some("60"),
};

const PARAM_STATUS_PREFIX: ParamDef = ParamDef {
    name: "status_prefix",
    description: "Leading digits of the status code (1-3 digits)",
    param_type: ParamType::String,
    default: Some("5"),
};

const PARAM_LONGEST: ParamDef = ParamDef {
    name: "longest",
    description: "Slowest first when true, fastest first when false",
    param_type: ParamType::Boolean,
    default: Some("true"),
};

const PARAM_DEPTH: ParamDef = ParamDef {
    name: "depth",
    description: "1-based path segment position",
    param_type: ParamType::Integer,
    default: None,
};

const PARAM_SEGMENT: ParamDef = ParamDef {
    name: "segment",
    description: "Segment value to match exactly",
    param_type: ParamType::String,
    default: None,
};

const PARAM_SORT: ParamDef = ParamDef {
    name: "sort",
    description: "count, domain, forwarded_for, user_agent, referer or upstream_worker_name",
    param_type: ParamType::String,
    default: Some("count"),
};

// ─── Static catalog ──────────────────────────────────────────────

pub static QUERY_CATALOG: &[QueryDef] = &[
    // Clients
    TOP_COMBOS,
    TOP_USER_AGENTS,
    CONVERSION_STATS,
    // Traffic
    REQUEST_FREQUENCY,
    REQUESTS_IN_WINDOW,
    BUSIEST_MINUTES,
    // Errors
    SERVER_ERRORS,
    // Latency
    EXTREME_LATENCY,
    // Paths
    PATH_DEPTH,
    // Upstream
    UPSTREAM_COUNTS,
];

/// Look up a query by ID
pub fn get_query(id: &str) -> Option<&'static QueryDef> {
    QUERY_CATALOG.iter().find(|q| q.id == id)
}

/// Resolve the template placeholders
///
/// `table` must already be a quoted, validated identifier and `order` one of
/// the fixed clauses chosen by the engine.
pub fn render(query: &QueryDef, table: &str, order: Option<&str>) -> String {
    let sql = query.sql_template.replace("{table}", table);
    match order {
        Some(order) => sql.replace("{order}", order),
        None => sql,
    }
}
