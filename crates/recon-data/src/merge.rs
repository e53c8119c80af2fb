//! Roster ⟕ reconciled events, plus the per-owner rollup.

use std::collections::BTreeMap;

use recon_core::error::{ReconError, Result};
use recon_core::models::{
    add_amount, ColumnConfig, MergedRow, MergedTable, OwnerSummaryRow, ReconciledTable, SummaryOutcome,
    EMAIL_COLUMN,
};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::roster::RosterTable;

/// Merged table and owner rollup for one roster upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: MergedTable,
    pub summary: SummaryOutcome,
}

/// Which roster columns feed the derived email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmailSource {
    primary: usize,
    fallback: Option<usize>,
}

impl EmailSource {
    fn resolve(roster: &RosterTable, columns: &ColumnConfig) -> Result<Self> {
        let present: Vec<usize> = [&columns.email_column, &columns.fallback_email_column]
            .into_iter()
            .filter_map(|name| roster.column_index(name))
            .collect();

        match present.as_slice() {
            [] => Err(ReconError::MissingColumn(format!(
                "'{}' or '{}'",
                columns.email_column, columns.fallback_email_column
            ))),
            [only] => Ok(Self {
                primary: *only,
                fallback: None,
            }),
            [first, second, ..] => Ok(Self {
                primary: *first,
                fallback: Some(*second),
            }),
        }
    }

    /// First non-empty value, preferring the primary column.
    fn email_for(&self, row: &[String]) -> Option<String> {
        non_empty(&row[self.primary])
            .or_else(|| self.fallback.and_then(|idx| non_empty(&row[idx])))
            .map(str::to_string)
    }
}

/// Left-join every roster row to the reconciled table on the derived email.
///
/// The output has exactly one row per roster row. Rows without a match, or
/// without any email, carry zero amounts. Emails only present in the events
/// are not represented.
pub fn merge_roster(
    roster: &RosterTable,
    reconciled: &ReconciledTable,
    columns: &ColumnConfig,
) -> Result<MergedTable> {
    let source = EmailSource::resolve(roster, columns)?;

    let mut headers = roster.headers().to_vec();
    let email_slot = match roster.column_index(EMAIL_COLUMN) {
        Some(idx) => idx,
        None => {
            headers.push(EMAIL_COLUMN.to_string());
            headers.len() - 1
        }
    };

    let rows: Vec<MergedRow> = roster
        .rows()
        .iter()
        .map(|row| {
            let email = source.email_for(row);
            let matched = email.as_deref().and_then(|e| reconciled.get(e));

            let mut cells = row.clone();
            let email_cell = email.clone().unwrap_or_default();
            if email_slot < cells.len() {
                cells[email_slot] = email_cell;
            } else {
                cells.push(email_cell);
            }

            MergedRow {
                cells,
                email,
                paid_amount: matched.map(|m| m.paid_amount).unwrap_or(Decimal::ZERO),
                refund_amount: matched.map(|m| m.refund_amount).unwrap_or(Decimal::ZERO),
            }
        })
        .collect();

    let merged = MergedTable { headers, rows };
    debug!(
        roster_rows = roster.len(),
        matched = merged.matched_count(),
        "roster merged with reconciled events"
    );
    Ok(merged)
}

/// Sum paid and refunded amounts per owner, largest paid total first.
///
/// Rows with an empty owner cell have no group and are left out. An owner
/// whose totals leave the `Decimal` range fails the whole rollup.
pub fn owner_summary(merged: &MergedTable, owner_column: &str) -> Result<SummaryOutcome> {
    let Some(owner_idx) = merged.headers.iter().position(|h| h == owner_column) else {
        warn!(
            column = owner_column,
            "owner column not found in roster; summary skipped"
        );
        return Ok(SummaryOutcome::OwnerColumnMissing {
            column: owner_column.to_string(),
        });
    };

    let mut groups: BTreeMap<&str, (Decimal, Decimal)> = BTreeMap::new();
    for row in &merged.rows {
        let Some(owner) = row.cells.get(owner_idx).and_then(|c| non_empty(c)) else {
            continue;
        };
        let entry = groups.entry(owner).or_insert((Decimal::ZERO, Decimal::ZERO));
        let what = || format!("owner '{}'", owner);
        entry.0 = add_amount(entry.0, row.paid_amount, what)?;
        entry.1 = add_amount(entry.1, row.refund_amount, what)?;
    }

    let mut rows: Vec<OwnerSummaryRow> = groups
        .into_iter()
        .map(|(owner, (paid, refund))| OwnerSummaryRow {
            owner: owner.to_string(),
            total_paid: paid,
            total_refund: refund,
        })
        .collect();
    rows.sort_by(|a, b| b.total_paid.cmp(&a.total_paid));

    Ok(SummaryOutcome::Produced(rows))
}

/// Merge a roster and roll it up by owner in one step.
pub fn merge_and_summarize(
    roster: &RosterTable,
    reconciled: &ReconciledTable,
    columns: &ColumnConfig,
) -> Result<MergeReport> {
    let merged = merge_roster(roster, reconciled, columns)?;
    let summary = owner_summary(&merged, &columns.owner_column)?;
    Ok(MergeReport { merged, summary })
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
