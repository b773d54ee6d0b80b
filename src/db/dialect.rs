//! SQL fragments that differ between relational backends.
//!
//! The executing store is SQLite; the other variants describe what a
//! different backend has to supply for the same queries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    /// Integer day number of a timestamp expression; consecutive calendar
    /// days (UTC) map to consecutive integers.
    pub fn day_number(&self, expr: &str) -> String {
        match self {
            Dialect::Sqlite => format!("CAST(julianday(date({expr})) AS INTEGER)"),
            Dialect::Postgres => format!("(CAST({expr} AS DATE) - DATE '1970-01-01')"),
            Dialect::MySql => format!("TO_DAYS({expr})"),
        }
    }

    /// ORDER BY expression that sorts `column` by its position in a list of
    /// `n` bound values, or `None` when the backend cannot order by an
    /// explicit list.
    pub fn explicit_order(&self, column: &str, n: usize) -> Option<String> {
        if n == 0 {
            return None;
        }
        match self {
            Dialect::MySql => Some(format!(
                "FIELD({column}, {})",
                crate::utils::placeholders(n)
            )),
            Dialect::Sqlite | Dialect::Postgres => {
                let mut expr = format!("CASE {column}");
                for position in 0..n {
                    expr.push_str(&format!(" WHEN ? THEN {position}"));
                }
                expr.push_str(&format!(" ELSE {n} END"));
                Some(expr)
            }
        }
    }
}
