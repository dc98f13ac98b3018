//! Merge statements
//!
//! Renders the GoogleSQL that moves a landing table into its target. Table
//! names stay unqualified; query jobs run against the configured dataset.

use crate::adapters::traits::MergeRequest;
use crate::domain::table::MergeStrategy;
use crate::domain::timestamp::format_timestamp;
use crate::domain::{Result, SluiceError};

const RANK_COLUMN: &str = "__sluice_rank";

/// Backtick-quoted identifier
fn quote(identifier: &str) -> Result<String> {
    if identifier.is_empty() || identifier.contains(['`', '\\']) {
        return Err(SluiceError::LoadSubmission(format!(
            "identifier '{identifier}' cannot be quoted for BigQuery"
        )));
    }
    Ok(format!("`{identifier}`"))
}

fn quote_all<'a>(identifiers: impl IntoIterator<Item = &'a String>) -> Result<Vec<String>> {
    identifiers.into_iter().map(|i| quote(i)).collect()
}

/// DDL creating `table` with the schema of `like`, once
pub fn create_like_sql(table: &str, like: &str) -> Result<String> {
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} LIKE {}",
        quote(table)?,
        quote(like)?
    ))
}

/// Statement or script applying the landing table to the target
pub fn render_merge(request: &MergeRequest) -> Result<String> {
    let target = quote(&request.target_table)?;
    let landing = quote(&request.landing_table)?;
    let start = format_timestamp(&request.window.start);
    let end = format_timestamp(&request.window.end);

    match &request.strategy {
        MergeStrategy::ReplaceWindow => {
            let window_column = quote(&request.window_column)?;
            let columns = quote_all(&request.columns)?.join(", ");
            Ok(format!(
                "BEGIN TRANSACTION;\n\
                 DELETE FROM {target} WHERE {window_column} BETWEEN '{start}' AND '{end}';\n\
                 INSERT INTO {target} ({columns}) SELECT {columns} FROM {landing};\n\
                 COMMIT TRANSACTION;"
            ))
        }
        MergeStrategy::Upsert { keys } => render_upsert(request, keys, &target, &landing),
        MergeStrategy::Custom { sql } => Ok(sql
            .replace("{target}", &target)
            .replace("{landing}", &landing)
            .replace("{window_start}", &start)
            .replace("{window_end}", &end)),
    }
}

fn render_upsert(
    request: &MergeRequest,
    keys: &[String],
    target: &str,
    landing: &str,
) -> Result<String> {
    let has_column = |name: &str| request.columns.iter().any(|c| c.eq_ignore_ascii_case(name));
    if keys.is_empty() {
        return Err(SluiceError::LoadSubmission(format!(
            "{}: upsert needs at least one merge key",
            request.table_name
        )));
    }
    if let Some(missing) = keys.iter().find(|k| !has_column(k)) {
        return Err(SluiceError::LoadSubmission(format!(
            "{}: merge key '{missing}' is not a staged column",
            request.table_name
        )));
    }

    let quoted_keys = quote_all(keys)?;
    let columns = quote_all(&request.columns)?;
    let updates: Vec<String> = request
        .columns
        .iter()
        .filter(|c| !keys.iter().any(|k| k.eq_ignore_ascii_case(c)))
        .map(|c| quote(c).map(|q| format!("{q} = S.{q}")))
        .collect::<Result<_>>()?;

    let order = if has_column(&request.window_column) {
        format!(" ORDER BY {} DESC", quote(&request.window_column)?)
    } else {
        String::new()
    };
    let on: Vec<String> = quoted_keys.iter().map(|k| format!("T.{k} = S.{k}")).collect();
    let values: Vec<String> = columns.iter().map(|c| format!("S.{c}")).collect();

    let mut sql = format!(
        "MERGE {target} T\n\
         USING (\n  \
           SELECT * EXCEPT({RANK_COLUMN}) FROM (\n    \
             SELECT *, ROW_NUMBER() OVER (PARTITION BY {partition}{order}) AS {RANK_COLUMN} FROM {landing}\n  \
           ) WHERE {RANK_COLUMN} = 1\n\
         ) S\n\
         ON {on}\n",
        partition = quoted_keys.join(", "),
        on = on.join(" AND "),
    );
    if !updates.is_empty() {
        sql.push_str(&format!("WHEN MATCHED THEN UPDATE SET {}\n", updates.join(", ")));
    }
    sql.push_str(&format!(
        "WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        columns.join(", "),
        values.join(", ")
    ));
    Ok(sql)
}
