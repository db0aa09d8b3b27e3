use chrono::{DateTime, Local};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use turnstile_common::{Error, Result};

use crate::store::{AttendanceStore, parse_datetime};

/// One schema change known at build time.
pub struct Migration {
    pub version: &'static str,
    pub description: &'static str,
    pub script: &'static str,
}

/// The full, ordered migration catalog. 1.0.0 carries no script; its
/// schema is created by `initialize()` and its history row is seeded
/// there.
pub const CATALOG: &[Migration] = &[
    Migration {
        version: "1.0.0",
        description: "Initial system setup",
        script: "",
    },
    Migration {
        version: "1.1.0",
        description: "Add member metadata fields",
        script: "ALTER TABLE members ADD COLUMN email TEXT;
                 ALTER TABLE members ADD COLUMN address TEXT;
                 ALTER TABLE members ADD COLUMN photo_url TEXT;",
    },
    Migration {
        version: "1.2.0",
        description: "Add scan location tracking",
        script: "ALTER TABLE scan_history ADD COLUMN latitude REAL;
                 ALTER TABLE scan_history ADD COLUMN longitude REAL;
                 ALTER TABLE scan_history ADD COLUMN location_name TEXT;",
    },
    Migration {
        version: "1.3.0",
        description: "Add gateway sync status",
        script: "ALTER TABLE gateways ADD COLUMN sync_status TEXT DEFAULT 'synced';
                 ALTER TABLE gateways ADD COLUMN pending_uploads INTEGER DEFAULT 0;",
    },
];

/// A version_history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub version: String,
    pub description: String,
    pub applied_at: DateTime<Local>,
}

/// Snapshot of where the store stands against the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub current_version: String,
    pub pending: Vec<PendingMigration>,
    pub history: Vec<AppliedMigration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMigration {
    pub version: String,
    pub description: String,
}

/// Parse a dotted `major.minor.patch` version, each component numeric.
/// Ordering is per component, not lexicographic: "1.10.0" > "1.9.0".
fn parse_semver(s: &str) -> Result<(u64, u64, u64)> {
    let mut parts = s.split('.');
    let mut next = |label: &str| -> Result<u64> {
        parts
            .next()
            .ok_or_else(|| Error::Database(format!("version {s} is missing its {label} component")))?
            .parse::<u64>()
            .map_err(|_| Error::Database(format!("version {s} has a non-numeric {label} component")))
    };
    let triple = (next("major")?, next("minor")?, next("patch")?);
    if parts.next().is_some() {
        return Err(Error::Database(format!(
            "version {s} has more than three components"
        )));
    }
    Ok(triple)
}

/// Drives the catalog against an `AttendanceStore`.
pub struct MigrationRunner<'a> {
    store: &'a AttendanceStore,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(store: &'a AttendanceStore) -> Self {
        Self { store }
    }

    pub fn current_version(&self) -> Result<String> {
        Ok(self
            .store
            .get_config("system_version")?
            .unwrap_or_else(|| "1.0.0".to_string()))
    }

    /// Catalog entries newer than the current version (semver order)
    /// that are not already in the version history, in catalog order.
    pub fn pending(&self) -> Result<Vec<&'static Migration>> {
        let current = parse_semver(&self.current_version()?)?;
        let applied: Vec<String> = self
            .store
            .version_history()?
            .into_iter()
            .map(|m| m.version)
            .collect();

        let mut pending = Vec::new();
        for migration in CATALOG {
            if applied.iter().any(|v| v == migration.version) {
                continue;
            }
            if parse_semver(migration.version)? > current {
                pending.push(migration);
            }
        }
        Ok(pending)
    }

    /// Apply every pending migration strictly in catalog order. The
    /// first failure aborts the run; already-applied migrations stay
    /// applied, the failed one leaves no trace.
    pub fn apply_all_pending(&self) -> Result<usize> {
        let pending = self.pending()?;
        if pending.is_empty() {
            info!("schema is up to date (v{})", self.current_version()?);
            return Ok(0);
        }

        warn!("{} pending schema migrations", pending.len());
        let mut applied = 0;
        for migration in pending {
            self.store
                .apply_migration(migration.version, migration.description, migration.script)?;
            info!(
                "applied migration {}: {}",
                migration.version, migration.description
            );
            applied += 1;
        }
        Ok(applied)
    }

    pub fn status(&self) -> Result<MigrationStatus> {
        Ok(MigrationStatus {
            current_version: self.current_version()?,
            pending: self
                .pending()?
                .iter()
                .map(|m| PendingMigration {
                    version: m.version.to_string(),
                    description: m.description.to_string(),
                })
                .collect(),
            history: self.store.version_history()?,
        })
    }
}

impl AttendanceStore {
    /// Run one schema alteration, record it and bump the version marker
    /// as a single transaction. A failure anywhere rolls back the whole
    /// unit, so the version marker can never run ahead of the schema.
    pub fn apply_migration(&self, version: &str, description: &str, script: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin migration: {e}")))?;

        tx.execute_batch(script)
            .map_err(|e| Error::Database(format!("migration {version} failed: {e}")))?;
        tx.execute(
            "INSERT INTO version_history (version, description, applied_at, migration_script)
             VALUES (?1, ?2, ?3, ?4)",
            params![version, description, Local::now().to_rfc3339(), script],
        )
        .map_err(|e| Error::Database(format!("failed to record migration {version}: {e}")))?;
        tx.execute(
            "UPDATE system_config
             SET config_value = ?1, updated_at = ?2
             WHERE config_key = 'system_version'",
            params![version, Local::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(format!("failed to update system version: {e}")))?;

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit migration {version}: {e}")))
    }

    /// Applied migrations, newest first.
    pub fn version_history(&self) -> Result<Vec<AppliedMigration>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT version, description, applied_at FROM version_history
                 ORDER BY applied_at DESC, id DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    description: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    applied_at: parse_datetime(row.get::<_, String>(2)?),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query history: {e}")))?;

        let mut history = Vec::new();
        for row in rows {
            history.push(row.map_err(|e| Error::Database(format!("failed to read history: {e}")))?);
        }
        Ok(history)
    }
}
