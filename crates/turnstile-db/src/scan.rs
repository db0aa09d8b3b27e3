use chrono::{DateTime, Local};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use turnstile_common::{Error, Result};

use crate::registry::{MemberRecord, member_by_qr_with};
use crate::store::{AttendanceStore, parse_datetime};

/// Minimum spacing between two scans of the same member at the same
/// gateway on the same calendar date.
const COOLDOWN_SECS: i64 = 60 * 60;

/// The outcome of one presented-and-recognized scan attempt. An outcome
/// exists only for recognized QR ids; unknown ids surface as `NotFound`
/// and leave no trace in the scan history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub member: MemberRecord,
    pub accepted: bool,
    pub message: String,
}

impl AttendanceStore {
    /// Evaluate a presented QR code at a gateway and append the audit
    /// record. See `process_scan_at` for the rules.
    pub fn process_scan(&self, qr_code_id: &str, gateway_id: &str) -> Result<ScanOutcome> {
        self.process_scan_at(qr_code_id, gateway_id, Local::now())
    }

    /// Checks run in order, first failure wins:
    /// 1. unknown or inactive QR id -> `NotFound`, nothing recorded;
    /// 2. `upload_date` in the future -> rejected;
    /// 3. under 60 minutes since the most recent scan of this member at
    ///    this gateway on the same calendar date -> rejected, message
    ///    carries the whole minutes remaining;
    /// 4. otherwise accepted.
    /// Outcomes 2-4 each append exactly one scan_history row.
    pub fn process_scan_at(
        &self,
        qr_code_id: &str,
        gateway_id: &str,
        now: DateTime<Local>,
    ) -> Result<ScanOutcome> {
        // One guard across lookup, cooldown check and audit insert:
        // concurrent scans of the same (member, gateway, date) must not
        // both read "no recent scan" before either records one.
        let conn = self.connection()?;

        let member = member_by_qr_with(&conn, qr_code_id)?
            .ok_or_else(|| Error::NotFound("member not found in database".into()))?;

        if member.upload_date > now {
            return finish_scan(
                &conn,
                &member,
                gateway_id,
                now,
                false,
                "Invalid: Member data uploaded in future".to_string(),
            );
        }

        if let Some(last_scanned_at) = last_scan_same_day(&conn, &member, gateway_id, now)? {
            let elapsed_secs = (now - last_scanned_at).num_seconds();
            if elapsed_secs < COOLDOWN_SECS {
                let remaining_minutes = (COOLDOWN_SECS - elapsed_secs) / 60;
                return finish_scan(
                    &conn,
                    &member,
                    gateway_id,
                    now,
                    false,
                    format!("Already scanned. Wait {remaining_minutes} more minutes"),
                );
            }
        }

        finish_scan(&conn, &member, gateway_id, now, true, "Valid scan".to_string())
    }

    /// Total scan_history rows, valid or not. Used by tests and reporting.
    pub fn scan_event_count(&self) -> Result<i64> {
        let conn = self.connection()?;
        conn.query_row("SELECT COUNT(*) FROM scan_history", [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to count scans: {e}")))
    }
}

/// Timestamp of the most recent scan_history row for this exact
/// (member, gateway, calendar date) key. Only the latest row counts;
/// earlier same-day events do not participate in the cooldown.
fn last_scan_same_day(
    conn: &rusqlite::Connection,
    member: &MemberRecord,
    gateway_id: &str,
    now: DateTime<Local>,
) -> Result<Option<DateTime<Local>>> {
    let scan_date = now.date_naive().to_string();
    let last: Option<String> = conn
        .query_row(
            "SELECT scanned_at FROM scan_history
             WHERE member_id = ?1 AND scan_date = ?2 AND gateway_id = ?3
             ORDER BY scanned_at DESC LIMIT 1",
            params![member.id, scan_date, gateway_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to query last scan: {e}")))?;
    Ok(last.map(parse_datetime))
}

fn finish_scan(
    conn: &rusqlite::Connection,
    member: &MemberRecord,
    gateway_id: &str,
    now: DateTime<Local>,
    is_valid: bool,
    message: String,
) -> Result<ScanOutcome> {
    conn.execute(
        "INSERT INTO scan_history (
             qr_code_id, member_id, gateway_id, scanned_at, scan_date,
             is_valid, validation_message
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            member.qr_code_id,
            member.id,
            gateway_id,
            now.to_rfc3339(),
            now.date_naive().to_string(),
            is_valid,
            message,
        ],
    )
    .map_err(|e| Error::Database(format!("failed to record scan: {e}")))?;

    if is_valid {
        info!("valid scan: member={} gateway={gateway_id}", member.qr_code_id);
    } else {
        debug!(
            "rejected scan: member={} gateway={gateway_id}: {message}",
            member.qr_code_id
        );
    }

    Ok(ScanOutcome {
        member: member.clone(),
        accepted: is_valid,
        message,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::registry::MemberRow;

    fn store_with_member(qr: &str) -> AttendanceStore {
        let store = AttendanceStore::in_memory().unwrap();
        let row = MemberRow {
            name: "Asha Rao".to_string(),
            qr_code_id: qr.to_string(),
            ..Default::default()
        };
        store
            .add_member_at(&row, "GATEWAY-001", None, t(2025, 3, 1, 8, 0, 0))
            .unwrap();
        store
    }

    fn t(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn unknown_qr_is_not_found_and_leaves_no_trace() {
        let store = store_with_member("QR-1");
        let err = store
            .process_scan_at("QR-GHOST", "GATEWAY-001", t(2025, 3, 1, 10, 0, 0))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.scan_event_count().unwrap(), 0);
    }

    #[test]
    fn first_scan_of_the_day_is_valid() {
        let store = store_with_member("QR-1");
        let outcome = store
            .process_scan_at("QR-1", "GATEWAY-001", t(2025, 3, 1, 10, 0, 0))
            .unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.message, "Valid scan");
        assert_eq!(store.scan_event_count().unwrap(), 1);
    }

    #[test]
    fn future_upload_date_is_always_rejected_and_recorded() {
        let store = AttendanceStore::in_memory().unwrap();
        let row = MemberRow {
            name: "Time Traveller".to_string(),
            qr_code_id: "QR-FUT".to_string(),
            ..Default::default()
        };
        store
            .add_member_at(&row, "GATEWAY-001", None, t(2025, 3, 2, 0, 0, 0))
            .unwrap();

        let outcome = store
            .process_scan_at("QR-FUT", "GATEWAY-001", t(2025, 3, 1, 10, 0, 0))
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.message, "Invalid: Member data uploaded in future");
        assert_eq!(store.scan_event_count().unwrap(), 1);

        // Still rejected on repeat, regardless of cooldown state.
        let outcome = store
            .process_scan_at("QR-FUT", "GATEWAY-001", t(2025, 3, 1, 12, 0, 0))
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.message, "Invalid: Member data uploaded in future");
        assert_eq!(store.scan_event_count().unwrap(), 2);
    }

    #[test]
    fn repeat_scan_within_cooldown_reports_remaining_minutes() {
        let store = store_with_member("QR-1");
        let first = t(2025, 3, 1, 10, 0, 0);
        store.process_scan_at("QR-1", "GATEWAY-001", first).unwrap();

        // 10 minutes 30 seconds later: floor(60 - 10.5) = 49.
        let outcome = store
            .process_scan_at("QR-1", "GATEWAY-001", first + Duration::seconds(630))
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.message, "Already scanned. Wait 49 more minutes");

        // Each attempt, valid or not, appends one event.
        assert_eq!(store.scan_event_count().unwrap(), 2);
    }

    #[test]
    fn cooldown_boundary_just_under_an_hour() {
        let store = store_with_member("QR-1");
        let first = t(2025, 3, 1, 10, 0, 0);
        store.process_scan_at("QR-1", "GATEWAY-001", first).unwrap();

        let outcome = store
            .process_scan_at("QR-1", "GATEWAY-001", first + Duration::seconds(3599))
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.message, "Already scanned. Wait 0 more minutes");
    }

    #[test]
    fn scan_after_cooldown_expires_is_valid() {
        let store = store_with_member("QR-1");
        let first = t(2025, 3, 1, 10, 0, 0);
        store.process_scan_at("QR-1", "GATEWAY-001", first).unwrap();

        let outcome = store
            .process_scan_at("QR-1", "GATEWAY-001", first + Duration::minutes(61))
            .unwrap();
        assert!(outcome.accepted);
    }

    #[test]
    fn cooldown_counts_from_most_recent_event_only() {
        let store = store_with_member("QR-1");
        let first = t(2025, 3, 1, 10, 0, 0);
        store.process_scan_at("QR-1", "GATEWAY-001", first).unwrap();

        // The rejection at +50min becomes the most recent event, so a
        // scan at +70min is still inside its window.
        store
            .process_scan_at("QR-1", "GATEWAY-001", first + Duration::minutes(50))
            .unwrap();
        let outcome = store
            .process_scan_at("QR-1", "GATEWAY-001", first + Duration::minutes(70))
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.message, "Already scanned. Wait 40 more minutes");
    }

    #[test]
    fn cooldown_is_scoped_per_gateway() {
        let store = store_with_member("QR-1");
        store
            .register_gateway("GATE-EAST", "East", "East Wing")
            .unwrap();

        let now = t(2025, 3, 1, 10, 0, 0);
        let at_main = store.process_scan_at("QR-1", "GATEWAY-001", now).unwrap();
        let at_east = store
            .process_scan_at("QR-1", "GATE-EAST", now + Duration::minutes(1))
            .unwrap();
        assert!(at_main.accepted);
        assert!(at_east.accepted);
    }

    #[test]
    fn simultaneous_scans_admit_exactly_one() {
        let store = store_with_member("QR-1");
        let now = t(2025, 3, 1, 10, 0, 0);

        let threads = 8;
        let barrier = std::sync::Barrier::new(threads);
        let outcomes: Vec<ScanOutcome> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        store.process_scan_at("QR-1", "GATEWAY-001", now).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let accepted = outcomes.iter().filter(|o| o.accepted).count();
        assert_eq!(accepted, 1);
        assert_eq!(store.scan_event_count().unwrap(), threads as i64);
    }

    #[test]
    fn cooldown_is_scoped_per_calendar_date() {
        let store = store_with_member("QR-1");
        let late = t(2025, 3, 1, 23, 59, 30);
        let past_midnight = t(2025, 3, 2, 0, 0, 30);

        let first = store.process_scan_at("QR-1", "GATEWAY-001", late).unwrap();
        let second = store
            .process_scan_at("QR-1", "GATEWAY-001", past_midnight)
            .unwrap();
        assert!(first.accepted);
        assert!(second.accepted);
    }
}
