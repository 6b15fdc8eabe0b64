use std::sync::Arc;
use std::time::Duration;

use crate::types::RowValues;

/// Raw outcome of one driver call.
///
/// `rows` is `None` only for statements without a projection (a `DELETE` without
/// `RETURNING`, DDL, ...); `num_rows` is then the affected row count reported by the database.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column names shared by all rows.
    pub columns: Option<Arc<Vec<String>>>,
    pub rows: Option<Vec<Vec<RowValues>>>,
    pub num_rows: usize,
    decode_time: Option<Duration>,
}

impl QueryResult {
    /// Result of a statement that returned rows.
    #[must_use]
    pub fn with_rows(columns: Arc<Vec<String>>, rows: Vec<Vec<RowValues>>) -> Self {
        Self {
            num_rows: rows.len(),
            columns: Some(columns),
            rows: Some(rows),
            decode_time: None,
        }
    }

    /// Result of a statement with no projection.
    #[must_use]
    pub fn affected(num_rows: usize) -> Self {
        Self {
            columns: None,
            rows: None,
            num_rows,
            decode_time: None,
        }
    }

    /// Record how long the driver spent decoding rows; surfaced in the call's log entry.
    #[must_use]
    pub fn with_decode_time(mut self, decode_time: Duration) -> Self {
        self.decode_time = Some(decode_time);
        self
    }

    #[must_use]
    pub fn decode_time(&self) -> Option<Duration> {
        self.decode_time
    }

    /// Position of a column by name.
    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        self.columns
            .as_ref()?
            .iter()
            .position(|col| col == column_name)
    }

    /// Value at `row` for the named column.
    #[must_use]
    pub fn get(&self, row: usize, column_name: &str) -> Option<&RowValues> {
        let idx = self.column_index(column_name)?;
        self.rows.as_ref()?.get(row)?.get(idx)
    }

    /// Borrow the rows, treating "no projection" as empty.
    #[must_use]
    pub fn rows(&self) -> &[Vec<RowValues>] {
        self.rows.as_deref().unwrap_or(&[])
    }

    /// One-line summary used in log entries.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.rows {
            Some(rows) => {
                let width = self.columns.as_ref().map_or(0, |c| c.len());
                format!("{} row(s), {width} column(s)", rows.len())
            }
            None => format!("{} row(s) affected", self.num_rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_by_column_name() {
        let result = QueryResult::with_rows(
            Arc::new(vec!["id".into(), "name".into()]),
            vec![vec![RowValues::Int(1), RowValues::Text("alice".into())]],
        );
        assert_eq!(result.num_rows, 1);
        assert_eq!(result.get(0, "name"), Some(&RowValues::Text("alice".into())));
        assert_eq!(result.get(0, "missing"), None);
        assert_eq!(result.get(3, "id"), None);
    }

    #[test]
    fn affected_results_have_no_rows() {
        let result = QueryResult::affected(3);
        assert!(result.rows.is_none());
        assert!(result.rows().is_empty());
        assert_eq!(result.summary(), "3 row(s) affected");
    }
}
