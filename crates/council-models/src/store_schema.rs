use serde::{Deserialize, Serialize};

/// Kinds of records kept in the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    Session,
    Strategy,
    Quote,
}

impl RecordCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordCategory::Session => "session",
            RecordCategory::Strategy => "strategy",
            RecordCategory::Quote => "quote",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "session" => Some(RecordCategory::Session),
            "strategy" => Some(RecordCategory::Strategy),
            "quote" => Some(RecordCategory::Quote),
            _ => None,
        }
    }
}

/// SQLite schema of the record store.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS records (
///     key         TEXT PRIMARY KEY,
///     category    TEXT NOT NULL,
///     value_json  TEXT NOT NULL,
///     created_at  TEXT NOT NULL,
///     updated_at  TEXT NOT NULL
/// );
/// ```
pub const RECORD_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS records (
    key         TEXT PRIMARY KEY,
    category    TEXT NOT NULL,
    value_json  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_category ON records(category);
";

/// Key conventions for store records.
///
/// - Analysis results: `session:{session_id}`
/// - Final strategies: `strategy:{strategy_id}`
/// - Market quotes written by an external feed: `quote:{symbol}`
pub mod key_patterns {
    use std::fmt::Display;

    pub fn session(id: impl Display) -> String {
        format!("session:{id}")
    }

    pub fn strategy(id: impl Display) -> String {
        format!("strategy:{id}")
    }

    pub fn quote(symbol: &str) -> String {
        format!("quote:{symbol}")
    }
}

/// A raw row as read from SQLite.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    pub key: String,
    pub category: String,
    pub value_json: String,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_patterns() {
        assert_eq!(key_patterns::quote("SPY"), "quote:SPY");
        assert_eq!(key_patterns::session("abc"), "session:abc");
        assert_eq!(key_patterns::strategy(42), "strategy:42");
    }

    #[test]
    fn category_names_match_serde() {
        for category in [
            RecordCategory::Session,
            RecordCategory::Strategy,
            RecordCategory::Quote,
        ] {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
            assert_eq!(RecordCategory::parse(category.as_str()), Some(category));
        }
    }
}
