//! The pluggable relational state store.
//!
//! The engine treats every `*_op` string as opaque and never parses it; the
//! [`StateStore`] trait is the entire contract. Two reserved literal queries,
//! [`TRUE_SENTINEL`] and [`FALSE_SENTINEL`], are the one exception every
//! adapter must honor: they back the trivial dependency-check and
//! resolution-sentinel placeholders the engine synthesizes internally
//! (undo-twin entries, `merge_op`s that never resolve).
//!
//! [`InMemoryStateStore`] is the crate's only shipped adapter. It exists to
//! run this crate's own tests and its scenario suite, not as a production
//! relational engine — it understands a small pipe-delimited command
//! language of its own invention, documented below, rather than SQL.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use parking_lot::RwLock;

/// Reserved query every adapter must treat as "always true, no side effect".
pub const TRUE_SENTINEL: &str = "TRUE";
/// Reserved query every adapter must treat as "always false, no side effect".
pub const FALSE_SENTINEL: &str = "FALSE";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Boolean(bool),
    Null,
}

impl Value {
    /// Truthiness as used by `check`: zero/false/null/empty-text are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Integer(i) => *i != 0,
            Value::Text(s) => !s.is_empty(),
            Value::Timestamp(_) => true,
            Value::Boolean(b) => *b,
            Value::Null => false,
        }
    }
}

pub type Row = BTreeMap<String, Value>;

/// Opaque contract around a relational engine. Implementations
/// must be deterministic: the same sequence of `execute` calls against an
/// empty store must yield identical `read` results on every replica.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Apply a single write statement. No return value; durable on return.
    async fn execute(&self, query: &str) -> Result<()>;

    /// Evaluate a read query, returning its rows.
    async fn read(&self, query: &str) -> Result<Vec<Row>>;

    /// Evaluate a boolean query: true iff the first row's first column is
    /// truthy. `merge_op` queries are also routed through here — see
    /// [`crate::conflict::ConflictEngine`] — and an adapter may apply side
    /// effects as part of answering one, since the engine never
    /// distinguishes "the write succeeded" from "the merge was applied".
    async fn check(&self, query: &str) -> Result<bool>;
}

/// Reference [`StateStore`] adapter over an in-process table of rows, understanding
/// a pipe-delimited command convention private to this type:
///
/// - `SELECT|<table>|<col>=<val>&<col>=<val>...` (predicate half may be empty for all rows)
/// - `INSERT|<table>|<col>=<val>&<col>=<val>...`
/// - `DELETE|<table>|<col>=<val>&<col>=<val>...`
/// - `EXISTS|<table>|<predicate>` / `NOT_EXISTS|<table>|<predicate>`
/// - `MERGE|<table>|<predicate-or-empty>|<true|false>`: applies an insert
///   described by `<predicate-or-empty>` (columns as `col=val&col=val`, or
///   empty for a no-op merge), then reports the trailing `true`/`false` as
///   the resolution verdict.
/// - [`TRUE_SENTINEL`] / [`FALSE_SENTINEL`]: the two reserved literals.
///
/// All values round-trip as [`Value::Text`]; callers needing integers or
/// booleans compare against their string form (e.g. `day=1`).
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    tables: RwLock<BTreeMap<String, Vec<Row>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_predicate(predicate: &str) -> Vec<(String, String)> {
        if predicate.is_empty() {
            return Vec::new();
        }
        predicate
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn row_matches(row: &Row, predicate: &[(String, String)]) -> bool {
        predicate.iter().all(|(col, val)| {
            matches!(row.get(col), Some(Value::Text(s)) if s == val)
        })
    }

    fn insert(&self, table: &str, predicate: &str) {
        let cols = Self::parse_predicate(predicate);
        let row: Row = cols
            .into_iter()
            .map(|(k, v)| (k, Value::Text(v)))
            .collect();
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    fn delete(&self, table: &str, predicate: &str) {
        let cols = Self::parse_predicate(predicate);
        if let Some(rows) = self.tables.write().get_mut(table) {
            rows.retain(|row| !Self::row_matches(row, &cols));
        }
    }

    fn exists(&self, table: &str, predicate: &str) -> bool {
        let cols = Self::parse_predicate(predicate);
        self.tables
            .read()
            .get(table)
            .map(|rows| rows.iter().any(|row| Self::row_matches(row, &cols)))
            .unwrap_or(false)
    }

    fn select(&self, table: &str, predicate: &str) -> Vec<Row> {
        let cols = Self::parse_predicate(predicate);
        self.tables
            .read()
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| Self::row_matches(row, &cols))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn malformed(query: &str) -> Error {
        Error::Store(format!("malformed query: {query:?}"))
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn execute(&self, query: &str) -> Result<()> {
        let mut parts = query.splitn(3, '|');
        let op = parts.next().ok_or_else(|| Self::malformed(query))?;
        match op {
            "INSERT" => {
                let table = parts.next().ok_or_else(|| Self::malformed(query))?;
                let predicate = parts.next().unwrap_or("");
                self.insert(table, predicate);
                Ok(())
            }
            "DELETE" => {
                let table = parts.next().ok_or_else(|| Self::malformed(query))?;
                let predicate = parts.next().unwrap_or("");
                self.delete(table, predicate);
                Ok(())
            }
            _ => Err(Self::malformed(query)),
        }
    }

    async fn read(&self, query: &str) -> Result<Vec<Row>> {
        let mut parts = query.splitn(3, '|');
        let op = parts.next().ok_or_else(|| Self::malformed(query))?;
        match op {
            "SELECT" => {
                let table = parts.next().ok_or_else(|| Self::malformed(query))?;
                let predicate = parts.next().unwrap_or("");
                Ok(self.select(table, predicate))
            }
            _ => Err(Self::malformed(query)),
        }
    }

    async fn check(&self, query: &str) -> Result<bool> {
        if query == TRUE_SENTINEL {
            return Ok(true);
        }
        if query == FALSE_SENTINEL {
            return Ok(false);
        }
        let mut parts = query.splitn(4, '|');
        let op = parts.next().ok_or_else(|| Self::malformed(query))?;
        match op {
            "EXISTS" => {
                let table = parts.next().ok_or_else(|| Self::malformed(query))?;
                let predicate = parts.next().unwrap_or("");
                Ok(self.exists(table, predicate))
            }
            "NOT_EXISTS" => {
                let table = parts.next().ok_or_else(|| Self::malformed(query))?;
                let predicate = parts.next().unwrap_or("");
                Ok(!self.exists(table, predicate))
            }
            "MERGE" => {
                let table = parts.next().ok_or_else(|| Self::malformed(query))?;
                let predicate = parts.next().unwrap_or("");
                let resolved = parts.next().ok_or_else(|| Self::malformed(query))?;
                if !predicate.is_empty() {
                    self.insert(table, predicate);
                }
                match resolved {
                    "true" => Ok(true),
                    "false" => Ok(false),
                    _ => Err(Self::malformed(query)),
                }
            }
            _ => Err(Self::malformed(query)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_select_round_trips() {
        let store = InMemoryStateStore::new();
        store.execute("INSERT|rooms|name=Frist&day=1&hour=1").await.unwrap();
        let rows = store.read("SELECT|rooms|name=Frist").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("day"), Some(&Value::Text("1".to_string())));
    }

    #[tokio::test]
    async fn exists_and_not_exists() {
        let store = InMemoryStateStore::new();
        assert!(!store.check("EXISTS|rooms|name=Frist").await.unwrap());
        assert!(store.check("NOT_EXISTS|rooms|name=Frist").await.unwrap());
        store.execute("INSERT|rooms|name=Frist&day=1&hour=1").await.unwrap();
        assert!(store.check("EXISTS|rooms|name=Frist&day=1&hour=1").await.unwrap());
        assert!(!store.check("NOT_EXISTS|rooms|name=Frist&day=1&hour=1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_matching_rows_only() {
        let store = InMemoryStateStore::new();
        store.execute("INSERT|rooms|name=Frist&day=1").await.unwrap();
        store.execute("INSERT|rooms|name=Murray&day=1").await.unwrap();
        store.execute("DELETE|rooms|name=Frist").await.unwrap();
        let rows = store.read("SELECT|rooms|").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::Text("Murray".to_string())));
    }

    #[tokio::test]
    async fn sentinels_have_no_side_effects() {
        let store = InMemoryStateStore::new();
        assert!(store.check(TRUE_SENTINEL).await.unwrap());
        assert!(!store.check(FALSE_SENTINEL).await.unwrap());
        assert!(store.read("SELECT|rooms|").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_applies_insert_and_reports_resolution() {
        let store = InMemoryStateStore::new();
        let resolved = store.check("MERGE|rooms||true").await.unwrap();
        assert!(resolved);
        assert!(store.read("SELECT|rooms|").await.unwrap().is_empty());

        let resolved = store
            .check("MERGE|rooms|name=Overbooked&day=2|false")
            .await
            .unwrap();
        assert!(!resolved);
        assert_eq!(store.read("SELECT|rooms|").await.unwrap().len(), 1);
    }
}
