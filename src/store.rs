use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Statement};
use serde::Serialize;
use serde_json::Value;

use crate::record::Record;

pub const DEFAULT_DB_PATH: &str = "storage/page_pulse.sqlite";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create storage dir {}", dir.display()))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS dataset_items (
            id         INTEGER PRIMARY KEY,
            url        TEXT NOT NULL,
            is_error   BOOLEAN NOT NULL DEFAULT 0,
            data       TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_items_url ON dataset_items(url);

        CREATE TABLE IF NOT EXISTS key_value (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Dataset ──

/// Prepare the append statement once; reuse it for every record.
pub fn prepare_insert(conn: &Connection) -> Result<Statement<'_>> {
    Ok(conn.prepare("INSERT INTO dataset_items (url, is_error, data) VALUES (?1, ?2, ?3)")?)
}

pub fn save_item(insert: &mut Statement, record: &Record) -> Result<()> {
    let data = serde_json::to_string(record)?;
    insert.execute(rusqlite::params![record.url(), record.is_error(), data])?;
    Ok(())
}

/// Dataset items in insertion order.
pub fn fetch_items(conn: &Connection, limit: Option<usize>) -> Result<Vec<Value>> {
    let sql = match limit {
        Some(n) => format!("SELECT data FROM dataset_items ORDER BY id LIMIT {}", n),
        None => "SELECT data FROM dataset_items ORDER BY id".to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.iter()
        .map(|s| serde_json::from_str(s).context("Corrupt dataset item"))
        .collect()
}

pub struct DatasetStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

pub fn get_stats(conn: &Connection) -> Result<DatasetStats> {
    let (total, errors): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(is_error), 0) FROM dataset_items",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(DatasetStats {
        total: total as usize,
        ok: (total - errors) as usize,
        errors: errors as usize,
    })
}

// ── Key-value store ──

pub fn set_value<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO key_value (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        rusqlite::params![key, json],
    )?;
    Ok(())
}

pub fn get_value(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM key_value WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|s| serde_json::from_str(&s).context("Corrupt key-value entry"))
        .transpose()
}
