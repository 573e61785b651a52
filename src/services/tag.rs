//! TAG (table-augmented generation): a narrow, read-only SQL execution path
//! for questions the router classifies as structured lookups. The guard is
//! the whole safety story here — no SQL that isn't SELECT-shaped is ever
//! allowed to reach the database (spec.md design note (d)).

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Column, Row, TypeInfo};

use crate::database::DbPool;
use crate::utils::error::CoreError;

#[derive(Debug, Clone)]
pub struct TagResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[async_trait]
pub trait TagExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<TagResult, CoreError>;
}

pub struct PgTagExecutor {
    pool: DbPool,
}

impl PgTagExecutor {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TagExecutor for PgTagExecutor {
    async fn execute(&self, sql: &str) -> Result<TagResult, CoreError> {
        if !is_select_only(sql) {
            return Err(CoreError::PreconditionFailed(
                "TAG execution refused: only SELECT statements are permitted".into(),
            ));
        }

        let rows = sqlx::query(sql)
            .fetch_all(self.pool.get_pool())
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        let Some(first) = rows.first() else {
            return Ok(TagResult { columns: Vec::new(), rows: Vec::new() });
        };

        let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();
        let table_rows = rows.iter().map(row_to_values).collect();

        Ok(TagResult { columns, rows: table_rows })
    }
}

fn row_to_values(row: &sqlx::postgres::PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| decode_cell(row, i, col.type_info().name()))
        .collect()
}

fn decode_cell(row: &sqlx::postgres::PgRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "INT2" | "INT4" | "INT8" => row
            .try_get::<i64, _>(index)
            .ok()
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BOOL" => row.try_get::<bool, _>(index).ok().map(Value::from).unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .ok()
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

/// Strip `--` line comments and `/* */` block comments, then confirm the
/// remaining statement begins with SELECT (optionally via a read-only CTE
/// chain introduced by WITH) and contains no semicolon-separated second
/// statement.
fn is_select_only(sql: &str) -> bool {
    let stripped = strip_comments(sql);
    let trimmed = stripped.trim().trim_end_matches(';').trim();

    if trimmed.is_empty() {
        return false;
    }

    if trimmed.contains(';') {
        return false; // stacked statements
    }

    let lowered = trimmed.to_lowercase();
    let leading_keyword = lowered.split_whitespace().next().unwrap_or("");

    match leading_keyword {
        "select" => true,
        "with" => !contains_mutating_keyword(&lowered),
        _ => false,
    }
}

fn contains_mutating_keyword(lowered_sql: &str) -> bool {
    const MUTATORS: [&str; 8] = ["insert", "update", "delete", "drop", "alter", "truncate", "grant", "create"];
    MUTATORS.iter().any(|kw| word_boundary_contains(lowered_sql, kw))
}

fn word_boundary_contains(haystack: &str, needle: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric() && c != '_').any(|word| word == needle)
}

fn strip_comments(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '-' && chars.peek() == Some(&'-') {
            for c in chars.by_ref() {
                if c == '\n' {
                    result.push('\n');
                    break;
                }
            }
            continue;
        }

        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = ' ';
            for c in chars.by_ref() {
                if prev == '*' && c == '/' {
                    break;
                }
                prev = c;
            }
            continue;
        }

        result.push(c);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_select() {
        assert!(is_select_only("SELECT id, name FROM documents"));
    }

    #[test]
    fn accepts_select_with_trailing_semicolon() {
        assert!(is_select_only("select count(*) from documents;"));
    }

    #[test]
    fn rejects_insert() {
        assert!(!is_select_only("INSERT INTO documents (title) VALUES ('x')"));
    }

    #[test]
    fn rejects_stacked_statements() {
        assert!(!is_select_only("SELECT 1; DROP TABLE documents;"));
    }

    #[test]
    fn rejects_select_hiding_a_comment_stripped_mutation() {
        let sql = "SELECT 1 /* ; */; DELETE FROM documents";
        assert!(!is_select_only(sql));
    }

    #[test]
    fn rejects_with_cte_that_mutates() {
        let sql = "WITH t AS (DELETE FROM documents RETURNING id) SELECT * FROM t";
        assert!(!is_select_only(sql));
    }

    #[test]
    fn accepts_read_only_cte() {
        let sql = "WITH counts AS (SELECT knowledge_base_id, count(*) c FROM documents GROUP BY 1) SELECT * FROM counts";
        assert!(is_select_only(sql));
    }

    #[test]
    fn strips_line_comments_before_checking() {
        let sql = "-- this is a select\nSELECT 1";
        assert!(is_select_only(sql));
    }
}
