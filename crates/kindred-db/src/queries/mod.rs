pub mod admin;
pub mod matches;
pub mod messages;
pub mod social;
pub mod users;

use anyhow::Result;
use rusqlite::types::Value;

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// `?1, ?2, ...` for an `IN (...)` list of `n` ids starting at parameter `start`.
pub(crate) fn placeholders(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Growing WHERE clause with positional parameters, for the filterable list queries.
#[derive(Default)]
pub(crate) struct Filter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filter {
    /// Add a clause; every `?` in `clause` is numbered in order of `values`.
    pub(crate) fn push(&mut self, clause: &str, values: impl IntoIterator<Item = Value>) {
        let mut numbered = String::with_capacity(clause.len() + 8);
        let mut values = values.into_iter();
        for ch in clause.chars() {
            if ch == '?' {
                if let Some(v) = values.next() {
                    self.params.push(v);
                    numbered.push_str(&format!("?{}", self.params.len()));
                    continue;
                }
            }
            numbered.push(ch);
        }
        self.clauses.push(numbered);
    }

    pub(crate) fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// Number the next positional parameter will receive.
    pub(crate) fn next_index(&self) -> usize {
        self.params.len() + 1
    }

    pub(crate) fn params(&self) -> &[Value] {
        &self.params
    }

    pub(crate) fn params_with(&self, extra: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut all = self.params.clone();
        all.extend(extra);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_from_start() {
        assert_eq!(placeholders(1, 3), "?1, ?2, ?3");
        assert_eq!(placeholders(4, 2), "?4, ?5");
    }

    #[test]
    fn filter_numbers_parameters_across_clauses() {
        let mut f = Filter::default();
        f.push("id != ?", [Value::Integer(1)]);
        f.push("(a LIKE ? OR b LIKE ?)", [Value::Text("x".into()), Value::Text("y".into())]);
        assert_eq!(f.where_sql(), "WHERE id != ?1 AND (a LIKE ?2 OR b LIKE ?3)");
        assert_eq!(f.next_index(), 4);
        assert_eq!(f.params().len(), 3);
    }

    #[test]
    fn empty_filter_has_no_where() {
        assert_eq!(Filter::default().where_sql(), "");
    }
}
