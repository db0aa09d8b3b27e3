pub mod migrations;
pub mod registry;
pub mod scan;
pub mod stats;
pub mod store;

pub use migrations::{CATALOG, Migration, MigrationRunner, MigrationStatus};
pub use registry::{BatchSummary, GatewayRecord, MemberRecord, MemberRow, UploadBatchRecord};
pub use scan::ScanOutcome;
pub use stats::{MemberScanSummary, StatsReport};
pub use store::AttendanceStore;
