//! Statement classification: decides whether a statement is sequenced through the
//! backlog, executed read-only against the local engine, or remembered per connection.
//! Pure functions, no state.

/// How a statement is routed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueryKind {
    /// Executed locally, never replicated.
    Read,
    /// Sequenced through the backlog and replicated.
    Write,
    /// `SET SESSION ...`: remembered per connection, replayed before its next write.
    Session,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnalyzedQuery {
    pub sql: String,
    pub kind: QueryKind,
}

// Markers that force read-only routing wherever they appear. The last two are
// dump-artifact noise from common client apps that must never reach the backlog.
const READ_MARKERS: [&str; 8] = [
    "select",
    "show",
    "describe",
    "set names",
    "kill",
    "set profiling",
    "`wp_options`",
    "_transient_",
];

/// Classifies one statement, stripping dump-file noise first.
pub fn analyze(sql: &str) -> AnalyzedQuery {
    let cleaned = clean_up(sql.trim());
    let kind = query_kind(&cleaned);

    AnalyzedQuery { sql: cleaned, kind }
}

fn query_kind(sql: &str) -> QueryKind {
    let lowered = sql.to_lowercase();

    for marker in READ_MARKERS.iter() {
        if lowered.starts_with(marker) || lowered.contains(marker) {
            return QueryKind::Read;
        }
    }

    if lowered.starts_with("set session") {
        return QueryKind::Session;
    }

    QueryKind::Write
}

/// Strips leading `--` comment banners and rewrites the utf8 charset-compat banners that
/// old dump files carry to their utf8mb4 forms.
fn clean_up(sql: &str) -> String {
    if sql.starts_with("/*!40101 SET character_set_client = utf8 */") {
        return "/*!40101 SET character_set_client = utf8mb4 */".to_string();
    }
    if sql.starts_with("/*!40101 SET NAMES utf8 */") {
        return "/*!40101 SET NAMES utf8mb4 */".to_string();
    }

    if !sql.starts_with("--") {
        return sql.to_string();
    }

    let mut rest = sql;
    while rest.starts_with("--") || rest.starts_with("\r\n") || rest.starts_with('\n') {
        match rest.find('\n') {
            Some(newline) => rest = &rest[newline + 1..],
            None => return String::new(),
        }
    }

    rest.to_string()
}
