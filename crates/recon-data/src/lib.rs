//! Data layer for the sales reconciliation pipeline.
//!
//! Fetches the raw event export, normalizes it into per-email totals,
//! reconciles payments against refunds, loads rosters and merges them with
//! the reconciled figures.

pub mod export;
pub mod fetcher;
pub mod merge;
pub mod normalizer;
pub mod reconciler;
pub mod roster;

pub use recon_core as core;
