//! Runtime layer for the sales reconciliation pipeline.
//!
//! Runs fetch cycles with retry, keeps one reconciled snapshot per session
//! and serves roster merges from it.

pub mod runtime;
pub mod session;

pub use recon_core as core;
pub use recon_data as data;
pub use runtime::{EventSource, FetchOutcome, ReconRuntime, RetryPolicy};
pub use session::{ReconciledSnapshot, SessionId, SessionStore};
