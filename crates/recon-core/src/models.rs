use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ReconError, Result};

/// Header of the paid column appended to merged exports.
pub const PAID_AMOUNT_COLUMN: &str = "paid_amount";
/// Header of the refund column appended to merged exports.
pub const REFUND_AMOUNT_COLUMN: &str = "refund_amount";
/// Header of the derived join key.
pub const EMAIL_COLUMN: &str = "email";
/// Fixed file name of the merged download.
pub const MERGED_EXPORT_FILE_NAME: &str = "merged_output.csv";

/// The two event kinds the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Payment,
    Refund,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Payment => "payment",
            EventKind::Refund => "refund",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the canonical email of an event comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentitySource {
    /// `distinct_id`, then `$distinct_id_before_identity`, whichever first
    /// contains an `@`.
    DistinctId,
    /// A named property holding the email directly.
    Column(String),
}

/// Per-kind selection of the event name, identity and amount columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSpec {
    pub kind: EventKind,
    /// Name of the analytics event, e.g. `"New Payment Made"`.
    pub event_name: String,
    pub identity: IdentitySource,
    /// Property holding the monetary value.
    pub amount_column: String,
}

/// Every column and event name the pipeline keys on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub payment: EventSpec,
    pub refund: EventSpec,
    /// Preferred roster email column.
    pub email_column: String,
    /// Roster email column used where the preferred one is empty.
    pub fallback_email_column: String,
    /// Roster column used for the owner rollup.
    pub owner_column: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            payment: EventSpec {
                kind: EventKind::Payment,
                event_name: "New Payment Made".to_string(),
                identity: IdentitySource::DistinctId,
                amount_column: "Amount".to_string(),
            },
            refund: EventSpec {
                kind: EventKind::Refund,
                event_name: "Refund Granted".to_string(),
                identity: IdentitySource::Column("User Email".to_string()),
                amount_column: "Refund Amount".to_string(),
            },
            email_column: "Person - Email - Work".to_string(),
            fallback_email_column: "Person - Email - Other".to_string(),
            owner_column: "Deal - Owner".to_string(),
        }
    }
}

impl ColumnConfig {
    pub fn spec(&self, kind: EventKind) -> &EventSpec {
        match kind {
            EventKind::Payment => &self.payment,
            EventKind::Refund => &self.refund,
        }
    }

    /// Event names to request from the export endpoint, payments first.
    pub fn event_names(&self) -> Vec<String> {
        vec![
            self.payment.event_name.clone(),
            self.refund.event_name.clone(),
        ]
    }
}

// ── Normalized events ─────────────────────────────────────────────────────────

/// One email's summed amount for one event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub email: String,
    pub amount: Decimal,
}

/// Counters collected while normalizing one export batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    /// Records of this kind seen in the batch.
    pub records_read: usize,
    /// Records dropped because their `$insert_id` was already seen.
    pub duplicates_dropped: usize,
    /// Records kept without an insert id.
    pub missing_insert_id: usize,
    /// Records dropped because no email could be derived.
    pub unattributable: usize,
    /// Amounts that failed numeric coercion and contributed zero.
    pub coercion_failures: usize,
}

/// Per-email totals for one event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTable {
    pub kind: EventKind,
    /// Unique by email, sorted by amount descending then email.
    pub rows: Vec<NormalizedRow>,
    pub stats: NormalizeStats,
}

impl NormalizedTable {
    pub fn empty(kind: EventKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
            stats: NormalizeStats::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total(&self) -> Result<Decimal> {
        checked_total(self.rows.iter().map(|r| r.amount), || format!("{} total", self.kind))
    }
}

// ── Reconciled table ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledRow {
    pub email: String,
    pub paid_amount: Decimal,
    pub refund_amount: Decimal,
}

impl ReconciledRow {
    pub fn net(&self) -> Result<Decimal> {
        self.paid_amount
            .checked_sub(self.refund_amount)
            .ok_or_else(|| ReconError::AmountOverflow(format!("net of {}", self.email)))
    }
}

/// Payments and refunds joined on email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciledTable {
    rows: Vec<ReconciledRow>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ReconciledTable {
    /// Build a table from rows whose emails are already unique.
    pub fn from_rows(rows: Vec<ReconciledRow>) -> Self {
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.email.clone(), i))
            .collect();
        Self { rows, index }
    }

    pub fn rows(&self) -> &[ReconciledRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, email: &str) -> Option<&ReconciledRow> {
        self.index.get(email).map(|&i| &self.rows[i])
    }

    pub fn total_paid(&self) -> Result<Decimal> {
        checked_total(self.rows.iter().map(|r| r.paid_amount), || "total paid".to_string())
    }

    pub fn total_refunded(&self) -> Result<Decimal> {
        checked_total(self.rows.iter().map(|r| r.refund_amount), || "total refunded".to_string())
    }
}

// ── Checked arithmetic ────────────────────────────────────────────────────────

/// Add `amount` to `total`, failing with [`ReconError::AmountOverflow`]
/// instead of panicking when the sum leaves the `Decimal` range.
pub fn add_amount(total: Decimal, amount: Decimal, what: impl FnOnce() -> String) -> Result<Decimal> {
    total
        .checked_add(amount)
        .ok_or_else(|| ReconError::AmountOverflow(what()))
}

fn checked_total(
    mut amounts: impl Iterator<Item = Decimal>,
    what: impl Fn() -> String,
) -> Result<Decimal> {
    amounts.try_fold(Decimal::ZERO, |acc, amount| add_amount(acc, amount, &what))
}

// ── Merge output ──────────────────────────────────────────────────────────────

/// A roster row with its joined amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRow {
    /// Cells aligned with [`MergedTable::headers`], excluding the amounts.
    pub cells: Vec<String>,
    /// Derived join key; `None` when both email columns were empty.
    pub email: Option<String>,
    pub paid_amount: Decimal,
    pub refund_amount: Decimal,
}

/// Roster columns (plus `email`) with `paid_amount`/`refund_amount` appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedTable {
    pub headers: Vec<String>,
    pub rows: Vec<MergedRow>,
}

impl MergedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Headers as written to the export, amounts included.
    pub fn export_headers(&self) -> Vec<String> {
        let mut headers = self.headers.clone();
        headers.push(PAID_AMOUNT_COLUMN.to_string());
        headers.push(REFUND_AMOUNT_COLUMN.to_string());
        headers
    }

    /// Number of roster rows that matched at least one event.
    pub fn matched_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| !r.paid_amount.is_zero() || !r.refund_amount.is_zero())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSummaryRow {
    pub owner: String,
    pub total_paid: Decimal,
    pub total_refund: Decimal,
}

/// Result of the owner rollup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Rows sorted by `total_paid` descending.
    Produced(Vec<OwnerSummaryRow>),
    /// The roster has no owner column; nothing to roll up.
    OwnerColumnMissing { column: String },
}

impl SummaryOutcome {
    pub fn rows(&self) -> Option<&[OwnerSummaryRow]> {
        match self {
            SummaryOutcome::Produced(rows) => Some(rows),
            SummaryOutcome::OwnerColumnMissing { .. } => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
