#![allow(dead_code)]

use equity_ledger::db;
use rusqlite::Connection;
use tempfile::TempDir;

pub fn open_temp_db(dir: &TempDir) -> Connection {
    let path = dir.path().join("ledger.db");
    let conn = Connection::open(&path).expect("failed to open test database");
    db::ensure_schema(&conn).expect("failed to create schema");
    conn
}

pub fn date(s: &str) -> chrono::NaiveDate {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}
