//! Raw export parsing and per-email aggregation.
//!
//! Turns the newline-delimited JSON returned by [`crate::fetcher`] into one
//! [`NormalizedTable`] per event kind:
//!
//! 1. parse every line (any malformed line fails the whole batch),
//! 2. hoist the `properties` bag to the top level,
//! 3. drop repeated `$insert_id`s (first seen wins),
//! 4. derive the canonical email and drop records without one,
//! 5. coerce the amount to a decimal and sum it per email.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use recon_core::error::{ReconError, Result};
use recon_core::models::{
    ColumnConfig, EventSpec, IdentitySource, NormalizeStats, NormalizedRow,
    NormalizedTable,
};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Key of the nested property bag in an export record.
pub const PROPERTIES_KEY: &str = "properties";
/// Key of the event name in the envelope.
pub const EVENT_KEY: &str = "event";
/// Unique per-event identifier used for deduplication.
pub const INSERT_ID_KEY: &str = "$insert_id";
/// Current (post-identification) user identifier.
pub const DISTINCT_ID_KEY: &str = "distinct_id";
/// User identifier before identity resolution.
pub const DISTINCT_ID_BEFORE_IDENTITY_KEY: &str = "$distinct_id_before_identity";

/// One export record with its properties hoisted to the top level.
pub type FlatRecord = Map<String, Value>;

/// Both normalized tables produced from one export batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvents {
    pub payments: NormalizedTable,
    pub refunds: NormalizedTable,
    /// Non-blank lines in the batch, across all event names.
    pub records_total: usize,
}

impl NormalizedEvents {
    pub fn is_empty(&self) -> bool {
        self.payments.is_empty() && self.refunds.is_empty()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse and normalize a raw export batch for both event kinds.
pub fn normalize_export(raw: &str, columns: &ColumnConfig) -> Result<NormalizedEvents> {
    let records = parse_export(raw)?;
    let payments = normalize_records(&records, &columns.payment);
    let refunds = normalize_records(&records, &columns.refund);

    debug!(
        records = records.len(),
        payment_rows = payments.rows.len(),
        refund_rows = refunds.rows.len(),
        "export normalized"
    );

    Ok(NormalizedEvents {
        payments,
        refunds,
        records_total: records.len(),
    })
}

/// Parse every non-blank line as a JSON object and flatten it.
///
/// Fails with [`ReconError::MalformedExport`] on the first bad line; the
/// reported line number is 1-based and counts blank lines.
pub fn parse_export(raw: &str) -> Result<Vec<FlatRecord>> {
    let mut records = Vec::new();

    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: Map<String, Value> = serde_json::from_str(trimmed)
            .map_err(|source| ReconError::MalformedExport {
                line: idx + 1,
                source,
            })?;

        records.push(flatten_record(envelope));
    }

    Ok(records)
}

/// Hoist every key of the `properties` object next to the envelope fields.
///
/// Nested objects inside `properties` are flattened with `.`-joined keys.
/// Envelope fields are kept when a property has the same name.
pub fn flatten_record(mut envelope: Map<String, Value>) -> FlatRecord {
    let properties = envelope.remove(PROPERTIES_KEY);
    let mut flat = envelope;

    if let Some(Value::Object(props)) = properties {
        let mut hoisted = Map::new();
        flatten_into(&mut hoisted, None, props);
        for (key, value) in hoisted {
            flat.entry(key).or_insert(value);
        }
    }

    flat
}

/// Canonical email for a record under the distinct-id priority rule.
///
/// `distinct_id` wins when it contains `@`, then
/// `$distinct_id_before_identity`; otherwise the record is unattributable.
pub fn derive_email(record: &FlatRecord) -> Option<String> {
    email_like(record.get(DISTINCT_ID_KEY))
        .or_else(|| email_like(record.get(DISTINCT_ID_BEFORE_IDENTITY_KEY)))
}

/// Coerce a JSON value to a decimal amount.
///
/// Numbers and numeric strings (plain or scientific notation) succeed;
/// everything else, including a missing value, returns `None`.
pub fn coerce_amount(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

/// Normalize already-parsed records for one event kind.
pub fn normalize_records(records: &[FlatRecord], spec: &EventSpec) -> NormalizedTable {
    let mut stats = NormalizeStats::default();
    let mut seen_insert_ids: HashSet<String> = HashSet::new();
    let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();

    for record in records.iter().filter(|r| is_event(r, &spec.event_name)) {
        stats.records_read += 1;

        match record.get(INSERT_ID_KEY).and_then(stringify) {
            Some(id) => {
                if !seen_insert_ids.insert(id) {
                    stats.duplicates_dropped += 1;
                    continue;
                }
            }
            None => stats.missing_insert_id += 1,
        }

        let email = match &spec.identity {
            IdentitySource::DistinctId => derive_email(record),
            IdentitySource::Column(column) => email_like(record.get(column)),
        };
        let Some(email) = email else {
            stats.unattributable += 1;
            continue;
        };

        let amount = match coerce_amount(record.get(&spec.amount_column)) {
            Some(a) => a,
            None => {
                stats.coercion_failures += 1;
                Decimal::ZERO
            }
        };

        let total = totals.entry(email).or_insert(Decimal::ZERO);
        match total.checked_add(amount) {
            Some(sum) => *total = sum,
            None => {
                stats.coercion_failures += 1;
                warn!(
                    kind = %spec.kind,
                    %amount,
                    "amount would overflow the running total; counted as zero"
                );
            }
        }
    }

    if stats.coercion_failures > 0 {
        warn!(
            kind = %spec.kind,
            column = %spec.amount_column,
            count = stats.coercion_failures,
            "amounts could not be read as numbers and were counted as zero"
        );
    }
    if stats.unattributable > 0 {
        debug!(kind = %spec.kind, count = stats.unattributable, "dropped events without an email");
    }
    if stats.duplicates_dropped > 0 {
        debug!(kind = %spec.kind, count = stats.duplicates_dropped, "dropped duplicate insert ids");
    }

    let mut rows: Vec<NormalizedRow> = totals
        .into_iter()
        .map(|(email, amount)| NormalizedRow { email, amount })
        .collect();
    // BTreeMap already ordered by email; stable sort keeps it as tie-break.
    rows.sort_by(|a, b| b.amount.cmp(&a.amount));

    NormalizedTable {
        kind: spec.kind,
        rows,
        stats,
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, object: Map<String, Value>) {
    for (key, value) in object {
        let full_key = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key,
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(out, Some(&full_key), inner),
            other => {
                out.insert(full_key, other);
            }
        }
    }
}

fn is_event(record: &FlatRecord, event_name: &str) -> bool {
    record.get(EVENT_KEY).and_then(Value::as_str) == Some(event_name)
}

/// Strings verbatim, other scalars as their JSON text, null as absent.
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn email_like(value: Option<&Value>) -> Option<String> {
    let text = stringify(value?)?;
    let trimmed = text.trim();
    if trimmed.contains('@') {
        Some(trimmed.to_string())
    } else {
        None
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
