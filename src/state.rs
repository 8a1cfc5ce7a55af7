use eyre::Result;
use rusqlite::{Connection, params};
use std::path::Path;

// Re-use the get_app_data_prefix from config.rs
use crate::config::get_app_data_prefix;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:1122";
pub const MAX_ADDRESSES: usize = 10;

/// Server addresses the user has connected to, most recent first.
pub struct State {
    conn: Connection,
}

impl State {
    pub fn new() -> Result<Self> {
        let prefix = get_app_data_prefix()?;
        Self::open(&prefix.join("states.db"))
    }

    pub fn open(filepath: &Path) -> Result<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = filepath.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(filepath)?;
        Self::init_db(&conn)?;
        Ok(Self { conn })
    }

    fn init_db(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS addresses (
                address TEXT PRIMARY KEY,
                last_used INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Record `address` as the most recently used one. Only the newest
    /// [`MAX_ADDRESSES`] entries are kept.
    pub fn add_address(&self, address: &str) -> Result<()> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(());
        }
        // Strictly increasing, even for two calls in the same millisecond.
        let last_used: i64 = self.conn.query_row(
            "SELECT MAX(?1, COALESCE(MAX(last_used), 0) + 1) FROM addresses",
            params![chrono::Utc::now().timestamp_millis()],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO addresses (address, last_used) VALUES (?1, ?2)
             ON CONFLICT(address) DO UPDATE SET last_used = excluded.last_used",
            params![address, last_used],
        )?;
        self.conn.execute(
            "DELETE FROM addresses WHERE address NOT IN (
                SELECT address FROM addresses ORDER BY last_used DESC LIMIT ?1
            )",
            params![MAX_ADDRESSES as i64],
        )?;
        Ok(())
    }

    pub fn addresses(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT address FROM addresses ORDER BY last_used DESC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut addresses = Vec::new();
        for address in rows {
            addresses.push(address?);
        }
        Ok(addresses)
    }

    /// Most recent address, or [`DEFAULT_ADDRESS`] when none was recorded.
    pub fn most_recent(&self) -> Result<String> {
        let result = self.conn.query_row(
            "SELECT address FROM addresses ORDER BY last_used DESC LIMIT 1",
            [],
            |row| row.get(0),
        );
        match result {
            Ok(address) => Ok(address),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(DEFAULT_ADDRESS.to_string()),
            Err(e) => Err(e.into()),
        }
    }
}
