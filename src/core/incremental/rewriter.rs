//! Incremental query rewriting
//!
//! Turns a table's base query and its resolved window into the exact text sent
//! to the source. Rewriting is deterministic: identical inputs always produce
//! byte-identical output, and nothing here reads the clock.

use crate::core::incremental::resolver::ResolvedRange;
use crate::core::incremental::scan::{self, Token, TokenKind};
use crate::domain::ids::TableName;
use crate::domain::table::{TableSpec, LAST_RUN_TIME_PLACEHOLDER};
use crate::domain::timestamp::format_checked;
use crate::domain::{Result, SluiceError};
use std::fmt;

/// Literal bound to `:last_run_time` when a run has no window
///
/// A forced full load of an incremental table reads everything, so the
/// placeholder takes the earliest timestamp the source can represent.
pub const FULL_LOAD_FLOOR: &str = "0001-01-01 00:00:00";

/// Query ready for execution against the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalQuery {
    pub table_name: TableName,
    /// Named source database, `None` for the default one
    pub database: Option<String>,
    pub sql: String,
    /// Window the SQL is bounded by, `None` for full loads
    pub range: Option<ResolvedRange>,
}

impl fmt::Display for FinalQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Rewrite `base_query` to select only rows inside `range`
///
/// Without a range the base query is returned unmodified, except that any
/// `:last_run_time` placeholder is bound to [`FULL_LOAD_FLOOR`]. With a range:
/// - every `:last_run_time` placeholder outside literals and comments becomes
///   the quoted start literal
/// - `WHERE <col> BETWEEN '<start>' AND '<end>'` is added when the outer
///   statement has no `WHERE`, otherwise `AND <col> BETWEEN ...` is appended
///   to the existing predicate (parenthesized first if it has a top-level `OR`)
/// - the predicate goes before any top-level `GROUP BY`, `ORDER BY`, `LIMIT`
///   or set operation
/// - trailing semicolons and comments are dropped
///
/// # Errors
///
/// Returns [`SluiceError::QueryRewrite`] when a literal cannot be formatted,
/// the watermark column is not a plain identifier or the query cannot be
/// scanned (unterminated literal, several statements, empty text).
pub fn rewrite(
    base_query: &str,
    range: Option<&ResolvedRange>,
    spec: &TableSpec,
) -> Result<FinalQuery> {
    let invalid = |msg: String| SluiceError::QueryRewrite(format!("{}: {msg}", spec.name));

    let Some(range) = range else {
        return Ok(FinalQuery {
            table_name: spec.name.clone(),
            database: spec.database.clone(),
            sql: bind_floor(base_query).map_err(invalid)?,
            range: None,
        });
    };

    let start = format_checked(&range.start).map_err(invalid)?;
    let end = format_checked(&range.end).map_err(invalid)?;
    validate_column(&spec.timestamp_column).map_err(invalid)?;

    let sql = base_query;
    let tokens = scan::tokenize(sql).map_err(invalid)?;
    let body_end = statement_end(&tokens).map_err(invalid)?;

    // Only tokens of the statement body take part in clause detection
    let body_len = tokens.partition_point(|t| t.span.end <= body_end);
    let body = &tokens[..body_len];

    let trailing = scan::first_trailing_clause(sql, body);
    let limit = trailing.unwrap_or(body.len());
    let predicate_end = last_significant_before(body, limit)
        .map(|i| body[i].span.end)
        .ok_or_else(|| invalid("query has no statement before its trailing clauses".into()))?;

    let predicate = format!(
        "{} BETWEEN '{start}' AND '{end}'",
        spec.timestamp_column
    );

    let mut edits: Vec<(usize, usize, String)> = scan::placeholder_spans(
        sql,
        body,
        LAST_RUN_TIME_PLACEHOLDER.trim_start_matches(':'),
    )
    .into_iter()
    .map(|span| (span.start, span.end, format!("'{start}'")))
    .collect();

    match scan::top_level_where(sql, body, limit) {
        None => edits.push((predicate_end, predicate_end, format!(" WHERE {predicate}"))),
        Some(where_idx) => {
            let first = scan::next_significant(body, where_idx)
                .filter(|&i| i < limit)
                .ok_or_else(|| invalid("WHERE clause has no predicate".into()))?;
            if scan::has_top_level_or(sql, body, where_idx + 1, limit) {
                edits.push((body[first].span.start, body[first].span.start, "(".into()));
                edits.push((predicate_end, predicate_end, ")".into()));
            }
            edits.push((predicate_end, predicate_end, format!(" AND {predicate}")));
        }
    }

    // Stable sort keeps ")" ahead of " AND ..." at the same offset
    edits.sort_by_key(|(from, _, _)| *from);

    let mut out = String::with_capacity(body_end + predicate.len() + 16);
    let mut cursor = 0;
    for (from, to, text) in edits {
        out.push_str(&sql[cursor..from]);
        out.push_str(&text);
        cursor = to;
    }
    out.push_str(&sql[cursor..body_end]);

    Ok(FinalQuery {
        table_name: spec.name.clone(),
        database: spec.database.clone(),
        sql: out.trim_start().to_string(),
        range: Some(*range),
    })
}

/// Whether `sql` uses `:last_run_time` outside literals and comments
///
/// # Errors
///
/// Returns the scanner's message when the query cannot be tokenized.
pub fn uses_last_run_time(sql: &str) -> std::result::Result<bool, String> {
    if !sql.contains(LAST_RUN_TIME_PLACEHOLDER) {
        return Ok(false);
    }
    let tokens = scan::tokenize(sql)?;
    Ok(!scan::placeholder_spans(
        sql,
        &tokens,
        LAST_RUN_TIME_PLACEHOLDER.trim_start_matches(':'),
    )
    .is_empty())
}

/// Replace every `:last_run_time` placeholder with the quoted floor literal
fn bind_floor(sql: &str) -> std::result::Result<String, String> {
    if !sql.contains(LAST_RUN_TIME_PLACEHOLDER) {
        return Ok(sql.to_string());
    }

    let tokens = scan::tokenize(sql)?;
    let spans = scan::placeholder_spans(
        sql,
        &tokens,
        LAST_RUN_TIME_PLACEHOLDER.trim_start_matches(':'),
    );

    let mut out = String::with_capacity(sql.len() + spans.len() * FULL_LOAD_FLOOR.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&sql[cursor..span.start]);
        out.push('\'');
        out.push_str(FULL_LOAD_FLOOR);
        out.push('\'');
        cursor = span.end;
    }
    out.push_str(&sql[cursor..]);
    Ok(out)
}

/// Byte offset just past the last significant token, ignoring trailing `;`
fn statement_end(tokens: &[Token]) -> std::result::Result<usize, String> {
    let last = tokens
        .iter()
        .rposition(|t| t.is_significant() && t.kind != TokenKind::Semicolon)
        .ok_or_else(|| "base query is empty".to_string())?;

    if let Some(stray) = tokens[..last]
        .iter()
        .find(|t| t.kind == TokenKind::Semicolon)
    {
        return Err(format!(
            "base query contains more than one statement (';' at byte {})",
            stray.span.start
        ));
    }

    Ok(tokens[last].span.end)
}

/// The statement text without trailing `;` or comments
///
/// Used when a final query is embedded in another statement such as
/// `DECLARE ... CURSOR FOR`.
pub fn statement_body(sql: &str) -> std::result::Result<&str, String> {
    let tokens = scan::tokenize(sql)?;
    let end = statement_end(&tokens)?;
    Ok(sql[..end].trim_start())
}

fn last_significant_before(tokens: &[Token], limit: usize) -> Option<usize> {
    tokens[..limit].iter().rposition(Token::is_significant)
}

/// Accept `col`, `schema.col` or a double-quoted identifier
pub(crate) fn validate_column(column: &str) -> std::result::Result<(), String> {
    let quoted = column.len() >= 2
        && column.starts_with('"')
        && column.ends_with('"')
        && !column[1..column.len() - 1].contains('"');
    let plain = !column.is_empty()
        && column.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if quoted || plain {
        Ok(())
    } else {
        Err(format!("'{column}' is not a valid timestamp column"))
    }
}
