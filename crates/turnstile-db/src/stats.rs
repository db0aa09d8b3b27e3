use chrono::{DateTime, Local, NaiveDate};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use turnstile_common::{Error, Result};

use crate::registry::{MEMBER_COLUMNS, MemberRecord, member_from_row};
use crate::store::{AttendanceStore, parse_datetime_opt};

/// Read-only reporting view over members and their scan history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub total_members: i64,
    pub scanned_today: i64,
    pub members: Vec<MemberScanSummary>,
}

/// One active member annotated with scan totals derived from
/// scan_history, never stored redundantly on the member row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberScanSummary {
    #[serde(flatten)]
    pub member: MemberRecord,
    pub scan_count: i64,
    pub last_scanned_at: Option<DateTime<Local>>,
}

impl AttendanceStore {
    pub fn stats(&self, gateway_id: Option<&str>) -> Result<StatsReport> {
        self.stats_at(gateway_id, Local::now().date_naive())
    }

    pub fn stats_at(&self, gateway_id: Option<&str>, today: NaiveDate) -> Result<StatsReport> {
        let total_members = self.active_member_count(gateway_id)?;
        let scanned_today = self.valid_scans_today(gateway_id, today)?;
        let members = self.member_summaries(gateway_id)?;

        Ok(StatsReport {
            total_members,
            scanned_today,
            members,
        })
    }

    fn active_member_count(&self, gateway_id: Option<&str>) -> Result<i64> {
        let conn = self.connection()?;
        let count = match gateway_id {
            Some(gw) => conn.query_row(
                "SELECT COUNT(*) FROM members WHERE gateway_id = ?1 AND is_active = 1",
                params![gw],
                |row| row.get(0),
            ),
            None => conn.query_row(
                "SELECT COUNT(*) FROM members WHERE is_active = 1",
                [],
                |row| row.get(0),
            ),
        };
        count.map_err(|e| Error::Database(format!("failed to count members: {e}")))
    }

    /// Distinct members with at least one valid scan on the given date.
    pub fn valid_scans_today(&self, gateway_id: Option<&str>, today: NaiveDate) -> Result<i64> {
        let date = today.to_string();
        let conn = self.connection()?;
        let count = match gateway_id {
            Some(gw) => conn.query_row(
                "SELECT COUNT(DISTINCT member_id) FROM scan_history
                 WHERE scan_date = ?1 AND gateway_id = ?2 AND is_valid = 1",
                params![date, gw],
                |row| row.get(0),
            ),
            None => conn.query_row(
                "SELECT COUNT(DISTINCT member_id) FROM scan_history
                 WHERE scan_date = ?1 AND is_valid = 1",
                params![date],
                |row| row.get(0),
            ),
        };
        count.map_err(|e| Error::Database(format!("failed to count scans today: {e}")))
    }

    fn member_summaries(&self, gateway_id: Option<&str>) -> Result<Vec<MemberScanSummary>> {
        let conn = self.connection()?;
        let annotated = format!(
            "SELECT {MEMBER_COLUMNS},
                    (SELECT COUNT(*) FROM scan_history
                     WHERE member_id = members.id AND is_valid = 1) AS scan_count,
                    (SELECT scanned_at FROM scan_history
                     WHERE member_id = members.id AND is_valid = 1
                     ORDER BY scanned_at DESC LIMIT 1) AS last_scanned_at
             FROM members"
        );
        let map_summary = |row: &rusqlite::Row<'_>| -> rusqlite::Result<MemberScanSummary> {
            Ok(MemberScanSummary {
                member: member_from_row(row)?,
                scan_count: row.get(13)?,
                last_scanned_at: parse_datetime_opt(row.get(14)?),
            })
        };

        let mut summaries = Vec::new();
        match gateway_id {
            Some(gw) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "{annotated} WHERE gateway_id = ?1 AND is_active = 1
                         ORDER BY created_at DESC, id DESC"
                    ))
                    .map_err(|e| Error::Database(format!("failed to prepare stats query: {e}")))?;
                let rows = stmt
                    .query_map(params![gw], map_summary)
                    .map_err(|e| Error::Database(format!("failed to query stats: {e}")))?;
                for row in rows {
                    summaries.push(
                        row.map_err(|e| Error::Database(format!("failed to read summary: {e}")))?,
                    );
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "{annotated} WHERE is_active = 1 ORDER BY created_at DESC, id DESC"
                    ))
                    .map_err(|e| Error::Database(format!("failed to prepare stats query: {e}")))?;
                let rows = stmt
                    .query_map([], map_summary)
                    .map_err(|e| Error::Database(format!("failed to query stats: {e}")))?;
                for row in rows {
                    summaries.push(
                        row.map_err(|e| Error::Database(format!("failed to read summary: {e}")))?,
                    );
                }
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::registry::MemberRow;

    fn t(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn add(store: &AttendanceStore, name: &str, qr: &str, gateway: &str) {
        let row = MemberRow {
            name: name.to_string(),
            qr_code_id: qr.to_string(),
            ..Default::default()
        };
        store
            .add_member_at(&row, gateway, None, t(2025, 3, 1, 8, 0, 0))
            .unwrap();
    }

    #[test]
    fn empty_store_reports_zeroes() {
        let store = AttendanceStore::in_memory().unwrap();
        let report = store
            .stats_at(None, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
            .unwrap();
        assert_eq!(report.total_members, 0);
        assert_eq!(report.scanned_today, 0);
        assert!(report.members.is_empty());
    }

    #[test]
    fn counts_only_valid_scans_toward_scanned_today() {
        let store = AttendanceStore::in_memory().unwrap();
        add(&store, "Asha", "QR-1", "GATEWAY-001");
        add(&store, "Binod", "QR-2", "GATEWAY-001");

        let now = t(2025, 3, 1, 10, 0, 0);
        store.process_scan_at("QR-1", "GATEWAY-001", now).unwrap();
        // Rejected by cooldown: does not add to scanned_today.
        store
            .process_scan_at("QR-1", "GATEWAY-001", now + Duration::minutes(5))
            .unwrap();

        let report = store.stats_at(None, now.date_naive()).unwrap();
        assert_eq!(report.total_members, 2);
        assert_eq!(report.scanned_today, 1);
    }

    #[test]
    fn member_annotations_derive_from_history() {
        let store = AttendanceStore::in_memory().unwrap();
        add(&store, "Asha", "QR-1", "GATEWAY-001");

        let first = t(2025, 3, 1, 10, 0, 0);
        let second = first + Duration::minutes(90);
        store.process_scan_at("QR-1", "GATEWAY-001", first).unwrap();
        store.process_scan_at("QR-1", "GATEWAY-001", second).unwrap();
        // A rejected attempt never counts.
        store
            .process_scan_at("QR-1", "GATEWAY-001", second + Duration::minutes(1))
            .unwrap();

        let report = store.stats_at(None, first.date_naive()).unwrap();
        let asha = &report.members[0];
        assert_eq!(asha.scan_count, 2);
        assert_eq!(asha.last_scanned_at.unwrap(), second);
    }

    #[test]
    fn stats_filter_by_gateway() {
        let store = AttendanceStore::in_memory().unwrap();
        store
            .register_gateway("GATE-EAST", "East", "East Wing")
            .unwrap();
        add(&store, "Asha", "QR-1", "GATEWAY-001");
        add(&store, "Binod", "QR-2", "GATE-EAST");

        let now = t(2025, 3, 1, 10, 0, 0);
        store.process_scan_at("QR-1", "GATEWAY-001", now).unwrap();
        store.process_scan_at("QR-2", "GATE-EAST", now).unwrap();

        let east = store.stats_at(Some("GATE-EAST"), now.date_naive()).unwrap();
        assert_eq!(east.total_members, 1);
        assert_eq!(east.scanned_today, 1);
        assert_eq!(east.members.len(), 1);
        assert_eq!(east.members[0].member.qr_code_id, "QR-2");
    }

    #[test]
    fn yesterdays_scans_do_not_count_today() {
        let store = AttendanceStore::in_memory().unwrap();
        add(&store, "Asha", "QR-1", "GATEWAY-001");

        let yesterday = t(2025, 3, 1, 10, 0, 0);
        store
            .process_scan_at("QR-1", "GATEWAY-001", yesterday)
            .unwrap();

        let report = store
            .stats_at(None, NaiveDate::from_ymd_opt(2025, 3, 2).unwrap())
            .unwrap();
        assert_eq!(report.scanned_today, 0);
        // but lifetime annotations still reflect the valid scan
        assert_eq!(report.members[0].scan_count, 1);
    }
}
