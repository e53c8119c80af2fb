//! Per-session cache of the last successful reconciliation.
//!
//! Each session owns at most one [`ReconciledSnapshot`]. A snapshot is only
//! ever replaced whole, so a merge reading it through its `Arc` never sees a
//! half-updated table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recon_core::models::{NormalizeStats, ReconciledTable};
use recon_core::window::DateWindow;

/// Opaque key identifying one user session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable result of one successful fetch cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledSnapshot {
    pub table: ReconciledTable,
    /// Window the export covered.
    pub window: DateWindow,
    pub fetched_at: DateTime<Utc>,
    pub payment_stats: NormalizeStats,
    pub refund_stats: NormalizeStats,
}

/// Snapshot slots keyed by session.
#[derive(Debug, Default)]
pub struct SessionStore {
    slots: HashMap<SessionId, Arc<ReconciledSnapshot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `snapshot` for `session`, dropping whatever was there.
    pub fn replace(&mut self, session: &SessionId, snapshot: ReconciledSnapshot) -> Arc<ReconciledSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.slots.insert(session.clone(), Arc::clone(&snapshot));
        tracing::debug!(session = %session, rows = snapshot.table.len(), "snapshot replaced");
        snapshot
    }

    pub fn get(&self, session: &SessionId) -> Option<Arc<ReconciledSnapshot>> {
        self.slots.get(session).cloned()
    }

    /// Forget the snapshot of `session`; returns whether one existed.
    pub fn clear(&mut self, session: &SessionId) -> bool {
        self.slots.remove(session).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
