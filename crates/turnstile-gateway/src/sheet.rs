use turnstile_common::{Error, Result};
use turnstile_db::{MemberRecord, MemberRow};

/// Column contract shared with the frontend's exported sheets. `Name`
/// and `QR Code ID` are mandatory, the rest default to empty.
const COL_NAME: &str = "Name";
const COL_QR: &str = "QR Code ID";
const COL_DESIGNATION: &str = "Designation";
const COL_CONSTITUENCY: &str = "Constituency";
const COL_CONSTITUENCY_NO: &str = "Constituency Number";
const COL_MOBILE: &str = "Mobile Number";

/// Parse an uploaded CSV sheet into import rows. Row-level problems
/// (blank names, duplicate ids) are left for the import reconciliation
/// to count; only a missing required column rejects the whole sheet.
pub fn parse_member_rows(bytes: &[u8]) -> Result<Vec<MemberRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| Error::MalformedInput(format!("unreadable sheet header: {e}")))?
        .clone();
    let index_of = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let (name_idx, qr_idx) = match (index_of(COL_NAME), index_of(COL_QR)) {
        (Some(n), Some(q)) => (n, q),
        _ => {
            return Err(Error::MalformedInput(format!(
                "Missing required columns: {COL_NAME}, {COL_QR}"
            )));
        }
    };
    let designation_idx = index_of(COL_DESIGNATION);
    let constituency_idx = index_of(COL_CONSTITUENCY);
    let constituency_no_idx = index_of(COL_CONSTITUENCY_NO);
    let mobile_idx = index_of(COL_MOBILE);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| Error::MalformedInput(format!("unreadable sheet row: {e}")))?;
        let cell = |idx: Option<usize>| -> String {
            idx.and_then(|i| record.get(i))
                .unwrap_or_default()
                .to_string()
        };
        rows.push(MemberRow {
            name: cell(Some(name_idx)),
            qr_code_id: cell(Some(qr_idx)),
            designation: cell(designation_idx),
            constituency: cell(constituency_idx),
            constituency_number: cell(constituency_no_idx),
            mobile_number: cell(mobile_idx),
        });
    }
    Ok(rows)
}

/// Render the current member set back out as a CSV sheet, in the same
/// column order uploads use.
pub fn render_members(members: &[MemberRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            COL_NAME,
            COL_DESIGNATION,
            COL_CONSTITUENCY,
            COL_CONSTITUENCY_NO,
            COL_MOBILE,
            COL_QR,
        ])
        .map_err(|e| Error::Other(format!("failed to write sheet header: {e}")))?;

    for member in members {
        writer
            .write_record([
                member.name.as_str(),
                member.designation.as_str(),
                member.constituency.as_str(),
                member.constituency_number.as_str(),
                member.mobile_number.as_str(),
                member.qr_code_id.as_str(),
            ])
            .map_err(|e| Error::Other(format!("failed to write sheet row: {e}")))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Other(format!("failed to flush sheet: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Other(format!("sheet is not utf-8: {e}")))
}
