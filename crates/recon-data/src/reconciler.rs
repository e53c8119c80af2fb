//! Full outer join of payment and refund totals on email.

use std::collections::BTreeMap;

use recon_core::error::Result;
use recon_core::models::{add_amount, NormalizedTable, ReconciledRow, ReconciledTable};
use rust_decimal::Decimal;

/// Running paid/refund totals for one email.
#[derive(Debug, Clone, Default)]
struct Sides {
    paid: Decimal,
    refunded: Decimal,
}

/// Stateless helper joining normalized tables.
pub struct Reconciler;

impl Reconciler {
    /// Join `payments` and `refunds` on email.
    ///
    /// Every email of either table appears exactly once; the side it is
    /// missing from is zero. Rows are ordered by paid amount descending, then
    /// email, so identical inputs always give an identical table.
    ///
    /// Fails with [`recon_core::ReconError::AmountOverflow`] if repeated rows
    /// for one email sum past the `Decimal` range.
    pub fn reconcile(payments: &NormalizedTable, refunds: &NormalizedTable) -> Result<ReconciledTable> {
        let mut map: BTreeMap<&str, Sides> = BTreeMap::new();

        for row in &payments.rows {
            let sides = map.entry(row.email.as_str()).or_default();
            sides.paid = add_amount(sides.paid, row.amount, || format!("payments of {}", row.email))?;
        }
        for row in &refunds.rows {
            let sides = map.entry(row.email.as_str()).or_default();
            sides.refunded =
                add_amount(sides.refunded, row.amount, || format!("refunds of {}", row.email))?;
        }

        let mut rows: Vec<ReconciledRow> = map
            .into_iter()
            .map(|(email, sides)| ReconciledRow {
                email: email.to_string(),
                paid_amount: sides.paid,
                refund_amount: sides.refunded,
            })
            .collect();
        rows.sort_by(|a, b| b.paid_amount.cmp(&a.paid_amount));

        tracing::debug!(
            payments = payments.rows.len(),
            refunds = refunds.rows.len(),
            reconciled = rows.len(),
            "reconciled payments and refunds"
        );

        Ok(ReconciledTable::from_rows(rows))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
