use chrono::{DateTime, Local};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use turnstile_common::{Error, Result};
use uuid::Uuid;

use crate::store::{AttendanceStore, is_constraint_violation, parse_datetime, parse_datetime_opt};

/// Row-level import failures reported back to the caller are capped;
/// every failure still counts toward the batch totals.
const MAX_REPORTED_ROW_ERRORS: usize = 10;

/// A registered scanning station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRecord {
    pub id: i64,
    pub gateway_id: String,
    pub gateway_name: String,
    pub location: String,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Local>>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

/// A persisted member. `qr_code_id` is permanent and never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: i64,
    pub qr_code_id: String,
    pub name: String,
    pub designation: String,
    pub constituency: String,
    pub constituency_number: String,
    pub mobile_number: String,
    pub upload_date: DateTime<Local>,
    pub upload_batch_id: Option<String>,
    pub gateway_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

/// One input row of a bulk import, before insertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberRow {
    pub name: String,
    pub qr_code_id: String,
    pub designation: String,
    pub constituency: String,
    pub constituency_number: String,
    pub mobile_number: String,
}

/// One bulk-import operation and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBatchRecord {
    pub id: i64,
    pub batch_id: String,
    pub gateway_id: String,
    pub file_name: String,
    pub total_records: i64,
    pub successful_records: i64,
    pub failed_records: i64,
    pub upload_date: DateTime<Local>,
    pub uploaded_by: String,
    pub status: String,
}

/// Caller-facing summary of an `import_batch` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

pub(crate) const MEMBER_COLUMNS: &str = "id, qr_code_id, name, designation, constituency, \
     constituency_number, mobile_number, upload_date, upload_batch_id, gateway_id, \
     is_active, created_at, updated_at";

pub(crate) fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberRecord> {
    Ok(MemberRecord {
        id: row.get(0)?,
        qr_code_id: row.get(1)?,
        name: row.get(2)?,
        designation: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        constituency: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        constituency_number: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        mobile_number: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        upload_date: parse_datetime(row.get::<_, String>(7)?),
        upload_batch_id: row.get(8)?,
        gateway_id: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        is_active: row.get(10)?,
        created_at: parse_datetime(row.get::<_, String>(11)?),
        updated_at: parse_datetime(row.get::<_, String>(12)?),
    })
}

fn gateway_from_row(row: &Row<'_>) -> rusqlite::Result<GatewayRecord> {
    Ok(GatewayRecord {
        id: row.get(0)?,
        gateway_id: row.get(1)?,
        gateway_name: row.get(2)?,
        location: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        is_active: row.get(4)?,
        last_sync_at: parse_datetime_opt(row.get(5)?),
        created_at: parse_datetime(row.get::<_, String>(6)?),
        updated_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

const GATEWAY_COLUMNS: &str = "id, gateway_id, gateway_name, location, is_active, \
     last_sync_at, created_at, updated_at";

/// Active-member QR lookup against an already-held connection, so scan
/// processing can run it under the same guard as the audit insert.
pub(crate) fn member_by_qr_with(
    conn: &Connection,
    qr_code_id: &str,
) -> Result<Option<MemberRecord>> {
    conn.query_row(
        &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE qr_code_id = ?1 AND is_active = 1"),
        params![qr_code_id],
        member_from_row,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to look up member: {e}")))
}

impl AttendanceStore {
    /// Register a new gateway. A duplicate `gateway_id` is a conflict,
    /// never a silent upsert.
    pub fn register_gateway(&self, gateway_id: &str, name: &str, location: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO gateways (gateway_id, gateway_name, location, is_active)
             VALUES (?1, ?2, ?3, 1)",
            params![gateway_id, name, location],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                Error::Conflict(format!("gateway {gateway_id} is already registered"))
            } else {
                Error::Database(format!("failed to register gateway: {e}"))
            }
        })?;
        info!("registered gateway {gateway_id}");
        Ok(())
    }

    pub fn gateways(&self) -> Result<Vec<GatewayRecord>> {
        self.query_gateways("SELECT {cols} FROM gateways ORDER BY created_at DESC, id DESC")
    }

    pub fn active_gateways(&self) -> Result<Vec<GatewayRecord>> {
        self.query_gateways(
            "SELECT {cols} FROM gateways WHERE is_active = 1 ORDER BY created_at DESC, id DESC",
        )
    }

    fn query_gateways(&self, sql: &str) -> Result<Vec<GatewayRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&sql.replace("{cols}", GATEWAY_COLUMNS))
            .map_err(|e| Error::Database(format!("failed to prepare gateway query: {e}")))?;

        let rows = stmt
            .query_map([], gateway_from_row)
            .map_err(|e| Error::Database(format!("failed to query gateways: {e}")))?;

        let mut gateways = Vec::new();
        for row in rows {
            gateways
                .push(row.map_err(|e| Error::Database(format!("failed to read gateway: {e}")))?);
        }
        Ok(gateways)
    }

    pub fn gateway_by_id(&self, gateway_id: &str) -> Result<Option<GatewayRecord>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {GATEWAY_COLUMNS} FROM gateways WHERE gateway_id = ?1"),
            params![gateway_id],
            gateway_from_row,
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to look up gateway: {e}")))
    }

    /// Touch a gateway's last-sync timestamp.
    pub fn touch_gateway_sync(&self, gateway_id: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE gateways SET last_sync_at = ?1, updated_at = ?1 WHERE gateway_id = ?2",
                params![now, gateway_id],
            )
            .map_err(|e| Error::Database(format!("failed to update gateway sync: {e}")))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("gateway {gateway_id}")));
        }
        Ok(())
    }

    /// Insert one member, with `upload_date` = now.
    pub fn add_member(
        &self,
        row: &MemberRow,
        gateway_id: &str,
        batch_id: Option<&str>,
    ) -> Result<()> {
        self.add_member_at(row, gateway_id, batch_id, Local::now())
    }

    pub fn add_member_at(
        &self,
        row: &MemberRow,
        gateway_id: &str,
        batch_id: Option<&str>,
        upload_date: DateTime<Local>,
    ) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO members (
                 qr_code_id, name, designation, constituency,
                 constituency_number, mobile_number, upload_date,
                 upload_batch_id, gateway_id
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.qr_code_id,
                row.name,
                row.designation,
                row.constituency,
                row.constituency_number,
                row.mobile_number,
                upload_date.to_rfc3339(),
                batch_id,
                gateway_id,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                Error::Conflict(format!(
                    "member with QR code id {} already exists",
                    row.qr_code_id
                ))
            } else {
                Error::Database(format!("failed to add member: {e}"))
            }
        })?;
        Ok(())
    }

    /// Look up an active member by QR code id. Soft-deleted members are
    /// invisible here.
    pub fn member_by_qr(&self, qr_code_id: &str) -> Result<Option<MemberRecord>> {
        let conn = self.connection()?;
        member_by_qr_with(&conn, qr_code_id)
    }

    pub fn active_members(&self, gateway_id: Option<&str>) -> Result<Vec<MemberRecord>> {
        let conn = self.connection()?;
        let mut members = Vec::new();
        match gateway_id {
            Some(gw) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {MEMBER_COLUMNS} FROM members
                         WHERE is_active = 1 AND gateway_id = ?1
                         ORDER BY created_at DESC, id DESC"
                    ))
                    .map_err(|e| Error::Database(format!("failed to prepare member query: {e}")))?;
                let rows = stmt
                    .query_map(params![gw], member_from_row)
                    .map_err(|e| Error::Database(format!("failed to query members: {e}")))?;
                for row in rows {
                    members.push(
                        row.map_err(|e| Error::Database(format!("failed to read member: {e}")))?,
                    );
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {MEMBER_COLUMNS} FROM members
                         WHERE is_active = 1
                         ORDER BY created_at DESC, id DESC"
                    ))
                    .map_err(|e| Error::Database(format!("failed to prepare member query: {e}")))?;
                let rows = stmt
                    .query_map([], member_from_row)
                    .map_err(|e| Error::Database(format!("failed to query members: {e}")))?;
                for row in rows {
                    members.push(
                        row.map_err(|e| Error::Database(format!("failed to read member: {e}")))?,
                    );
                }
            }
        }
        Ok(members)
    }

    /// Best-effort bulk loader: each row is attempted independently and
    /// failures (missing fields, duplicate QR ids) never abort the batch.
    pub fn import_batch(
        &self,
        rows: &[MemberRow],
        gateway_id: &str,
        file_name: &str,
    ) -> Result<BatchSummary> {
        let batch_id = self.create_upload_batch(gateway_id, file_name)?;
        info!(
            "importing {} rows into batch {batch_id} for gateway {gateway_id}",
            rows.len()
        );

        let mut successful = 0usize;
        let mut failed = 0usize;
        let mut errors = Vec::new();
        let report = |msg: String, errors: &mut Vec<String>| {
            if errors.len() < MAX_REPORTED_ROW_ERRORS {
                errors.push(msg);
            }
        };

        for (idx, row) in rows.iter().enumerate() {
            if row.name.trim().is_empty() || row.qr_code_id.trim().is_empty() {
                failed += 1;
                report(
                    format!("row {}: missing name or QR code id", idx + 1),
                    &mut errors,
                );
                continue;
            }
            match self.add_member(row, gateway_id, Some(&batch_id)) {
                Ok(()) => successful += 1,
                Err(e) => {
                    debug!("import row {} failed: {e}", idx + 1);
                    failed += 1;
                    report(format!("row {}: {e}", idx + 1), &mut errors);
                }
            }
        }

        self.finalize_upload_batch(&batch_id, rows.len(), successful, failed)?;
        self.touch_gateway_sync(gateway_id).ok();

        Ok(BatchSummary {
            batch_id,
            total: rows.len(),
            successful,
            failed,
            errors,
        })
    }

    fn create_upload_batch(&self, gateway_id: &str, file_name: &str) -> Result<String> {
        let batch_id = format!("BATCH-{}", Uuid::new_v4());
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO upload_batches (batch_id, gateway_id, file_name, upload_date, uploaded_by)
             VALUES (?1, ?2, ?3, ?4, 'admin')",
            params![batch_id, gateway_id, file_name, Local::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(format!("failed to create upload batch: {e}")))?;
        Ok(batch_id)
    }

    fn finalize_upload_batch(
        &self,
        batch_id: &str,
        total: usize,
        successful: usize,
        failed: usize,
    ) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE upload_batches
             SET total_records = ?1, successful_records = ?2, failed_records = ?3
             WHERE batch_id = ?4",
            params![total as i64, successful as i64, failed as i64, batch_id],
        )
        .map_err(|e| Error::Database(format!("failed to finalize upload batch: {e}")))?;
        Ok(())
    }

    pub fn upload_history(&self, gateway_id: Option<&str>) -> Result<Vec<UploadBatchRecord>> {
        let conn = self.connection()?;
        let base = "SELECT id, batch_id, gateway_id, file_name, total_records, \
                    successful_records, failed_records, upload_date, uploaded_by, status \
                    FROM upload_batches";
        let map_batch = |row: &Row<'_>| -> rusqlite::Result<UploadBatchRecord> {
            Ok(UploadBatchRecord {
                id: row.get(0)?,
                batch_id: row.get(1)?,
                gateway_id: row.get(2)?,
                file_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                total_records: row.get(4)?,
                successful_records: row.get(5)?,
                failed_records: row.get(6)?,
                upload_date: parse_datetime(row.get::<_, String>(7)?),
                uploaded_by: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                status: row.get(9)?,
            })
        };

        let mut batches = Vec::new();
        match gateway_id {
            Some(gw) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "{base} WHERE gateway_id = ?1 ORDER BY upload_date DESC, id DESC"
                    ))
                    .map_err(|e| Error::Database(format!("failed to prepare batch query: {e}")))?;
                let rows = stmt
                    .query_map(params![gw], map_batch)
                    .map_err(|e| Error::Database(format!("failed to query batches: {e}")))?;
                for row in rows {
                    batches.push(
                        row.map_err(|e| Error::Database(format!("failed to read batch: {e}")))?,
                    );
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!("{base} ORDER BY upload_date DESC, id DESC"))
                    .map_err(|e| Error::Database(format!("failed to prepare batch query: {e}")))?;
                let rows = stmt
                    .query_map([], map_batch)
                    .map_err(|e| Error::Database(format!("failed to query batches: {e}")))?;
                for row in rows {
                    batches.push(
                        row.map_err(|e| Error::Database(format!("failed to read batch: {e}")))?,
                    );
                }
            }
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, qr: &str) -> MemberRow {
        MemberRow {
            name: name.to_string(),
            qr_code_id: qr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn register_gateway_and_list() {
        let store = AttendanceStore::in_memory().unwrap();
        store
            .register_gateway("GATE-EAST", "East Entrance", "East Wing")
            .unwrap();

        let gateways = store.gateways().unwrap();
        assert_eq!(gateways.len(), 2); // seeded default + new one
        assert!(gateways.iter().any(|g| g.gateway_id == "GATE-EAST"));
    }

    #[test]
    fn duplicate_gateway_is_conflict_and_row_unchanged() {
        let store = AttendanceStore::in_memory().unwrap();
        store
            .register_gateway("GATE-EAST", "East Entrance", "East Wing")
            .unwrap();

        let err = store
            .register_gateway("GATE-EAST", "Impostor", "Elsewhere")
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let original = store.gateway_by_id("GATE-EAST").unwrap().unwrap();
        assert_eq!(original.gateway_name, "East Entrance");
        assert_eq!(original.location, "East Wing");
    }

    #[test]
    fn touch_sync_updates_timestamp_and_rejects_unknown() {
        let store = AttendanceStore::in_memory().unwrap();
        assert!(
            store
                .gateway_by_id("GATEWAY-001")
                .unwrap()
                .unwrap()
                .last_sync_at
                .is_none()
        );

        store.touch_gateway_sync("GATEWAY-001").unwrap();
        assert!(
            store
                .gateway_by_id("GATEWAY-001")
                .unwrap()
                .unwrap()
                .last_sync_at
                .is_some()
        );

        let err = store.touch_gateway_sync("GATE-MISSING").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn add_member_then_lookup_by_qr() {
        let store = AttendanceStore::in_memory().unwrap();
        store
            .add_member(&row("Asha Rao", "NW-001-000001"), "GATEWAY-001", None)
            .unwrap();

        let member = store.member_by_qr("NW-001-000001").unwrap().unwrap();
        assert_eq!(member.name, "Asha Rao");
        assert_eq!(member.gateway_id, "GATEWAY-001");
        assert!(member.is_active);
        assert!(store.member_by_qr("NW-001-999999").unwrap().is_none());
    }

    #[test]
    fn duplicate_qr_id_is_conflict_not_overwrite() {
        let store = AttendanceStore::in_memory().unwrap();
        store
            .add_member(&row("Asha Rao", "NW-001-000001"), "GATEWAY-001", None)
            .unwrap();

        let err = store
            .add_member(&row("Someone Else", "NW-001-000001"), "GATEWAY-001", None)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let member = store.member_by_qr("NW-001-000001").unwrap().unwrap();
        assert_eq!(member.name, "Asha Rao");
    }

    #[test]
    fn import_batch_counts_partial_success() {
        let store = AttendanceStore::in_memory().unwrap();
        store
            .add_member(&row("Existing", "QR-DUP"), "GATEWAY-001", None)
            .unwrap();

        let rows = vec![
            row("Asha Rao", "QR-001"),
            row("Dup Person", "QR-DUP"), // duplicate
            row("", "QR-002"),           // missing name
            row("No Qr", ""),            // missing qr
            row("Binod Kumar", "QR-003"),
        ];
        let summary = store.import_batch(&rows, "GATEWAY-001", "members.csv").unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.errors.len(), 3);

        let history = store.upload_history(None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].batch_id, summary.batch_id);
        assert_eq!(history[0].total_records, 5);
        assert_eq!(history[0].successful_records, 2);
        assert_eq!(history[0].failed_records, 3);
        assert_eq!(history[0].file_name, "members.csv");

        // The gateway's last-sync is touched after an import.
        assert!(
            store
                .gateway_by_id("GATEWAY-001")
                .unwrap()
                .unwrap()
                .last_sync_at
                .is_some()
        );
    }

    #[test]
    fn import_batch_caps_reported_errors_at_ten() {
        let store = AttendanceStore::in_memory().unwrap();
        let rows: Vec<MemberRow> = (0..15).map(|i| row("", &format!("QR-{i}"))).collect();

        let summary = store.import_batch(&rows, "GATEWAY-001", "bad.csv").unwrap();
        assert_eq!(summary.failed, 15);
        assert_eq!(summary.errors.len(), 10);
    }

    #[test]
    fn import_n_rows_with_k_duplicates() {
        let store = AttendanceStore::in_memory().unwrap();
        for i in 0..3 {
            store
                .add_member(&row(&format!("Old {i}"), &format!("QR-{i}")), "GATEWAY-001", None)
                .unwrap();
        }

        // 8 rows, 3 of which duplicate existing ids.
        let rows: Vec<MemberRow> = (0..8)
            .map(|i| row(&format!("New {i}"), &format!("QR-{i}")))
            .collect();
        let summary = store.import_batch(&rows, "GATEWAY-001", "members.csv").unwrap();

        assert_eq!(summary.successful, 5);
        assert_eq!(summary.failed, 3);
    }

    #[test]
    fn upload_history_filters_by_gateway_newest_first() {
        let store = AttendanceStore::in_memory().unwrap();
        store
            .register_gateway("GATE-EAST", "East", "East Wing")
            .unwrap();

        store
            .import_batch(&[row("A", "QR-A")], "GATEWAY-001", "a.csv")
            .unwrap();
        store
            .import_batch(&[row("B", "QR-B")], "GATE-EAST", "b.csv")
            .unwrap();
        store
            .import_batch(&[row("C", "QR-C")], "GATEWAY-001", "c.csv")
            .unwrap();

        let all = store.upload_history(None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].file_name, "c.csv");

        let east = store.upload_history(Some("GATE-EAST")).unwrap();
        assert_eq!(east.len(), 1);
        assert_eq!(east[0].file_name, "b.csv");
    }
}
