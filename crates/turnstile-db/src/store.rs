use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use turnstile_common::{Error, Result};

/// Persistent storage for members, gateways, scan history and upload
/// batches. A single connection behind a mutex serves every request;
/// holding the guard across a read-then-write (the cooldown check in
/// `scan.rs`) serializes it against concurrent scans of the same key.
pub struct AttendanceStore {
    conn: Mutex<Connection>,
}

impl AttendanceStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening attendance store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    pub(crate) fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("attendance store lock poisoned".into()))
    }

    /// Create all tables and indexes if absent, then seed the initial
    /// system version, default gateway and version-history record.
    /// Safe to call on every process start.
    fn initialize(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS system_config (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                config_key TEXT UNIQUE NOT NULL,
                config_value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS gateways (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gateway_id TEXT UNIQUE NOT NULL,
                gateway_name TEXT NOT NULL,
                location TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_sync_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                qr_code_id TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                designation TEXT,
                constituency TEXT,
                constituency_number TEXT,
                mobile_number TEXT,
                upload_date TEXT NOT NULL,
                upload_batch_id TEXT,
                gateway_id TEXT REFERENCES gateways(gateway_id),
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS scan_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                qr_code_id TEXT NOT NULL,
                member_id INTEGER NOT NULL REFERENCES members(id),
                gateway_id TEXT NOT NULL REFERENCES gateways(gateway_id),
                scanned_at TEXT NOT NULL,
                scan_date TEXT NOT NULL,
                is_valid INTEGER NOT NULL DEFAULT 1,
                validation_message TEXT
            );

            CREATE TABLE IF NOT EXISTS upload_batches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id TEXT UNIQUE NOT NULL,
                gateway_id TEXT NOT NULL REFERENCES gateways(gateway_id),
                file_name TEXT,
                total_records INTEGER NOT NULL DEFAULT 0,
                successful_records INTEGER NOT NULL DEFAULT 0,
                failed_records INTEGER NOT NULL DEFAULT 0,
                upload_date TEXT NOT NULL DEFAULT (datetime('now')),
                uploaded_by TEXT,
                status TEXT NOT NULL DEFAULT 'completed'
            );

            CREATE TABLE IF NOT EXISTS version_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version TEXT NOT NULL,
                description TEXT,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                migration_script TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_members_qr_code ON members(qr_code_id);
            CREATE INDEX IF NOT EXISTS idx_members_upload_date ON members(upload_date);
            CREATE INDEX IF NOT EXISTS idx_scan_history_date ON scan_history(scan_date);
            CREATE INDEX IF NOT EXISTS idx_scan_history_member ON scan_history(member_id);
            CREATE INDEX IF NOT EXISTS idx_scan_history_gateway ON scan_history(gateway_id);",
        )
        .map_err(|e| Error::Database(format!("schema initialization failed: {e}")))?;

        conn.execute(
            "INSERT OR IGNORE INTO system_config (config_key, config_value)
             VALUES ('system_version', '1.0.0')",
            [],
        )
        .map_err(|e| Error::Database(format!("failed to seed system version: {e}")))?;

        let gateway_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM gateways", [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to count gateways: {e}")))?;
        if gateway_count == 0 {
            conn.execute(
                "INSERT INTO gateways (gateway_id, gateway_name, location, is_active)
                 VALUES ('GATEWAY-001', 'Main Gateway', 'Headquarters', 1)",
                [],
            )
            .map_err(|e| Error::Database(format!("failed to seed default gateway: {e}")))?;
            info!("seeded default gateway GATEWAY-001");
        }

        let version_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM version_history", [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to count version history: {e}")))?;
        if version_count == 0 {
            conn.execute(
                "INSERT INTO version_history (version, description)
                 VALUES ('1.0.0', 'Initial system setup with offline local database')",
                [],
            )
            .map_err(|e| Error::Database(format!("failed to seed version history: {e}")))?;
        }

        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT config_value FROM system_config WHERE config_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to read config {key}: {e}")))
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO system_config (config_key, config_value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(config_key) DO UPDATE SET
                 config_value = excluded.config_value,
                 updated_at = excluded.updated_at",
            params![key, value, Local::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(format!("failed to write config {key}: {e}")))?;
        Ok(())
    }
}

/// Treat any unique/foreign-key violation as a domain conflict.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub(crate) fn parse_datetime(s: String) -> DateTime<Local> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Local))
        .unwrap_or_else(|_| {
            // SQLite datetime('now') produces "YYYY-MM-DD HH:MM:SS" in UTC
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc().with_timezone(&Local))
                .unwrap_or_else(|_| Local::now())
        })
}

pub(crate) fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Local>> {
    s.map(parse_datetime)
}
