//! Shared types for the sales reconciliation pipeline.
//!
//! Holds the error taxonomy, table models, the validated date window,
//! command-line settings and display helpers used by the data, runtime and
//! binary crates.

pub mod error;
pub mod formatting;
pub mod models;
pub mod settings;
pub mod window;

pub use error::{ReconError, Result};
pub use models::*;
pub use window::DateWindow;
