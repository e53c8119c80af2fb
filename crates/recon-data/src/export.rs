//! CSV export of the merged table.

use std::path::{Path, PathBuf};

use recon_core::error::{ReconError, Result};
use recon_core::formatting::amount_cell;
use recon_core::models::{MergedTable, MERGED_EXPORT_FILE_NAME};
use tracing::info;

/// Serialise `table` as UTF-8 CSV: every roster column, the derived `email`,
/// then `paid_amount` and `refund_amount`.
pub fn to_csv_bytes(table: &MergedTable) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.export_headers())?;

    for row in &table.rows {
        let mut record: Vec<String> = row.cells.clone();
        record.push(amount_cell(row.paid_amount));
        record.push(amount_cell(row.refund_amount));
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| ReconError::Io(std::io::Error::other(e.to_string())))
}

/// Write `merged_output.csv` into `dir`, replacing any previous export.
pub fn write_merged_csv(table: &MergedTable, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let bytes = to_csv_bytes(table)?;

    let path = dir.join(MERGED_EXPORT_FILE_NAME);
    let tmp = path.with_extension("csv.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, &path)?;

    info!(path = %path.display(), rows = table.len(), "merged export written");
    Ok(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
