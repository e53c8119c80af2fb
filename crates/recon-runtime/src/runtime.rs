//! Fetch-cycle orchestration.
//!
//! [`ReconRuntime::refresh`] runs one cycle for a session: load the raw
//! export (with retry for transient failures), normalize, reconcile and
//! install the result in the [`SessionStore`]. [`ReconRuntime::merge`] joins a
//! roster against whatever the session has cached.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use recon_core::error::{ReconError, Result};
use recon_core::models::ColumnConfig;
use recon_core::window::DateWindow;
use recon_data::fetcher::ExportClient;
use recon_data::merge::{merge_and_summarize, MergeReport};
use recon_data::normalizer::normalize_export;
use recon_data::reconciler::Reconciler;
use recon_data::roster::RosterTable;
use tracing::{debug, info, warn};

use crate::session::{ReconciledSnapshot, SessionId, SessionStore};

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Attempts per fetch cycle, first try included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Back-off grows by this much per retry: 0 ms, 500 ms, 1000 ms.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(500);

// ── Public types ──────────────────────────────────────────────────────────────

/// Where the raw newline-delimited export comes from.
#[derive(Debug, Clone)]
pub enum EventSource {
    /// The export API.
    Remote(ExportClient),
    /// A previously saved export on disk.
    File(PathBuf),
}

/// Linear back-off for transient export failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    /// Delay before the zero-based `attempt`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Result of one successful fetch cycle.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Data was reconciled and cached for the session.
    Ready(Arc<ReconciledSnapshot>),
    /// The window holds no attributable payments or refunds.
    Empty,
}

// ── ReconRuntime ──────────────────────────────────────────────────────────────

/// Runs fetch cycles and merges for any number of sessions.
///
/// The runtime holds no per-session state itself; callers pass the
/// [`SessionStore`] in so they decide how sessions are kept.
#[derive(Debug, Clone)]
pub struct ReconRuntime {
    source: EventSource,
    columns: ColumnConfig,
    retry: RetryPolicy,
}

impl ReconRuntime {
    pub fn new(source: EventSource, columns: ColumnConfig) -> Self {
        Self {
            source,
            columns,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn columns(&self) -> &ColumnConfig {
        &self.columns
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// Fetch, normalize and reconcile `window` for `session`.
    ///
    /// On success the session's snapshot is replaced whole. An empty window
    /// clears it, so a later merge reports [`ReconError::NoReconciledData`].
    /// Any error leaves the existing snapshot exactly as it was.
    pub async fn refresh(
        &self,
        store: &mut SessionStore,
        session: &SessionId,
        window: &DateWindow,
    ) -> Result<FetchOutcome> {
        info!(session = %session, window = %window, "starting fetch cycle");

        let raw = self.load_with_retry(window).await?;
        let events = normalize_export(&raw, &self.columns)?;
        let table = Reconciler::reconcile(&events.payments, &events.refunds)?;
        let total_paid = table.total_paid()?;
        let total_refunded = table.total_refunded()?;

        if table.is_empty() {
            store.clear(session);
            info!(session = %session, records = events.records_total, "no reconciled data for window");
            return Ok(FetchOutcome::Empty);
        }

        let snapshot = store.replace(
            session,
            ReconciledSnapshot {
                table,
                window: *window,
                fetched_at: Utc::now(),
                payment_stats: events.payments.stats,
                refund_stats: events.refunds.stats,
            },
        );

        info!(
            session = %session,
            emails = snapshot.table.len(),
            total_paid = %total_paid,
            total_refunded = %total_refunded,
            "fetch cycle complete"
        );
        Ok(FetchOutcome::Ready(snapshot))
    }

    /// Merge `roster` with the snapshot cached for `session`.
    pub fn merge(
        &self,
        store: &SessionStore,
        session: &SessionId,
        roster: &RosterTable,
    ) -> Result<MergeReport> {
        let snapshot = store
            .get(session)
            .ok_or_else(|| ReconError::NoReconciledData(session.to_string()))?;
        merge_and_summarize(roster, &snapshot.table, &self.columns)
    }

    // ── Private helpers ───────────────────────────────────────────────────

    /// Load the raw export, retrying transient failures only.
    async fn load_with_retry(&self, window: &DateWindow) -> Result<String> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = self.retry.delay_before(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying export after back-off");
                tokio::time::sleep(delay).await;
            }

            match self.load_raw(window).await {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    warn!(attempt, error = %e, "export attempt failed");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn load_raw(&self, window: &DateWindow) -> Result<String> {
        match &self.source {
            EventSource::Remote(client) => client.fetch(&self.columns.event_names(), window).await,
            EventSource::File(path) => {
                debug!(path = %path.display(), "reading export from file");
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ReconError::FileRead {
                        path: path.clone(),
                        source,
                    })
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::NaiveDate;
    use recon_core::settings::Credentials;
    use rust_decimal::Decimal;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const PAYMENT: &str =
        r#"{"event":"New Payment Made","properties":{"distinct_id":"u@x.com","$insert_id":"p1","Amount":50}}"#;
    const REFUND: &str =
        r#"{"event":"Refund Granted","properties":{"$insert_id":"r1","User Email":"u@x.com","Refund Amount":"20"}}"#;

    fn window() -> DateWindow {
        let d = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        DateWindow::new(d(1), d(7), d(10)).unwrap()
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_step: Duration::ZERO,
        }
    }

    /// Answer one connection per entry in `responses`, in order.
    async fn serve_sequence(
        responses: Vec<(&'static str, String)>,
    ) -> (String, Arc<AtomicUsize>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);

        let handle = tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (format!("http://{}", addr), served, handle)
    }

    fn remote_runtime(base: String) -> ReconRuntime {
        let creds = Credentials {
            api_key: "key".to_string(),
            project_id: "1".to_string(),
        };
        let client = ExportClient::new(base, creds, Duration::from_secs(5)).unwrap();
        ReconRuntime::new(EventSource::Remote(client), ColumnConfig::default()).with_retry(no_wait())
    }

    fn file_runtime(dir: &tempfile::TempDir, contents: &str) -> ReconRuntime {
        let path = dir.path().join("export.ndjson");
        std::fs::write(&path, contents).unwrap();
        ReconRuntime::new(EventSource::File(path), ColumnConfig::default())
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_millis(500));
        assert_eq!(policy.delay_before(2), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_refresh_from_file_caches_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let runtime = file_runtime(&dir, &format!("{PAYMENT}\n{REFUND}\n"));
        let mut store = SessionStore::new();
        let session = SessionId::new("s1");

        let outcome = runtime.refresh(&mut store, &session, &window()).await.unwrap();
        let FetchOutcome::Ready(snapshot) = outcome else {
            panic!("expected data");
        };
        let row = snapshot.table.get("u@x.com").unwrap();
        assert_eq!(row.paid_amount, Decimal::from(50));
        assert_eq!(row.refund_amount, Decimal::from(20));
        assert_eq!(snapshot.window, window());
        assert!(store.get(&session).is_some());
    }

    #[tokio::test]
    async fn test_missing_export_file_is_file_read_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let runtime = ReconRuntime::new(
            EventSource::File(dir.path().join("absent.ndjson")),
            ColumnConfig::default(),
        );
        let mut store = SessionStore::new();
        let err = runtime
            .refresh(&mut store, &SessionId::new("s"), &window())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::FileRead { .. }));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (base, served, server) = serve_sequence(vec![
            ("503 Service Unavailable", "busy".to_string()),
            ("200 OK", format!("{PAYMENT}\n")),
        ])
        .await;
        let runtime = remote_runtime(base);
        let mut store = SessionStore::new();

        let outcome = runtime
            .refresh(&mut store, &SessionId::new("s"), &window())
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Ready(_)));
        server.await.unwrap();
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_not_retried_and_cache_kept() {
        let (base, served, server) =
            serve_sequence(vec![("401 Unauthorized", "nope".to_string())]).await;
        let runtime = remote_runtime(base);
        let mut store = SessionStore::new();
        let session = SessionId::new("s");

        let dir = tempfile::TempDir::new().unwrap();
        file_runtime(&dir, PAYMENT)
            .refresh(&mut store, &session, &window())
            .await
            .unwrap();
        let before = store.get(&session).unwrap();

        let err = runtime.refresh(&mut store, &session, &window()).await.unwrap_err();
        assert!(matches!(err, ReconError::Transport { status: 401, .. }));
        server.await.unwrap();
        assert_eq!(served.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&before, &store.get(&session).unwrap()));
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let (base, served, server) = serve_sequence(vec![
            ("500 Internal Server Error", "a".to_string()),
            ("502 Bad Gateway", "b".to_string()),
            ("503 Service Unavailable", "c".to_string()),
        ])
        .await;
        let runtime = remote_runtime(base);
        let mut store = SessionStore::new();

        let err = runtime
            .refresh(&mut store, &SessionId::new("s"), &window())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::Transport { status: 503, .. }));
        server.await.unwrap();
        assert_eq!(served.load(Ordering::SeqCst), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_total_overflow_is_an_error_and_cache_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = SessionStore::new();
        let session = SessionId::new("s");
        file_runtime(&dir, PAYMENT)
            .refresh(&mut store, &session, &window())
            .await
            .unwrap();
        let before = store.get(&session).unwrap();

        let huge = |email: &str, id: &str| {
            format!(
                r#"{{"event":"New Payment Made","properties":{{"distinct_id":"{email}","$insert_id":"{id}","Amount":"50000000000000000000000000000"}}}}"#
            )
        };
        let other = tempfile::TempDir::new().unwrap();
        let runtime = file_runtime(&other, &format!("{}\n{}\n", huge("a@x.com", "h1"), huge("b@x.com", "h2")));
        let err = runtime.refresh(&mut store, &session, &window()).await.unwrap_err();
        assert!(matches!(err, ReconError::AmountOverflow(_)));
        assert!(Arc::ptr_eq(&before, &store.get(&session).unwrap()));
    }

    #[tokio::test]
    async fn test_malformed_export_leaves_cache_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = SessionStore::new();
        let session = SessionId::new("s");
        file_runtime(&dir, PAYMENT)
            .refresh(&mut store, &session, &window())
            .await
            .unwrap();

        let bad_dir = tempfile::TempDir::new().unwrap();
        let err = file_runtime(&bad_dir, &format!("{PAYMENT}\nnot json\n"))
            .refresh(&mut store, &session, &window())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::MalformedExport { line: 2, .. }));
        assert!(store.get(&session).unwrap().table.get("u@x.com").is_some());
    }

    #[tokio::test]
    async fn test_empty_export_clears_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = SessionStore::new();
        let session = SessionId::new("s");
        file_runtime(&dir, PAYMENT)
            .refresh(&mut store, &session, &window())
            .await
            .unwrap();

        let empty_dir = tempfile::TempDir::new().unwrap();
        let runtime = file_runtime(&empty_dir, "\n");
        let outcome = runtime.refresh(&mut store, &session, &window()).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Empty));
        assert!(store.get(&session).is_none());

        let roster = RosterTable::new(vec!["Person - Email - Work".to_string()], vec![]);
        let err = runtime.merge(&store, &session, &roster).unwrap_err();
        assert!(matches!(err, ReconError::NoReconciledData(_)));
    }

    #[tokio::test]
    async fn test_merge_uses_session_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let runtime = file_runtime(&dir, &format!("{PAYMENT}\n{REFUND}\n"));
        let mut store = SessionStore::new();
        let session = SessionId::new("s");
        runtime.refresh(&mut store, &session, &window()).await.unwrap();

        let roster = RosterTable::new(
            vec!["Person - Email - Work".to_string(), "Deal - Owner".to_string()],
            vec![vec!["u@x.com".to_string(), "Alice".to_string()]],
        );
        let report = runtime.merge(&store, &session, &roster).unwrap();
        assert_eq!(report.merged.rows[0].paid_amount, Decimal::from(50));

        let other = runtime.merge(&store, &SessionId::new("other"), &roster);
        assert!(matches!(other, Err(ReconError::NoReconciledData(_))));
    }
}
