use chrono::NaiveDate;
use clap::{CommandFactory, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ReconError, Result};
use crate::models::{ColumnConfig, EventKind, EventSpec, IdentitySource};
use crate::window::{parse_date, DateWindow};

/// Environment variable holding the Basic-auth token for the export API.
pub const API_KEY_ENV: &str = "MIXPANEL_API_KEY";
/// Environment variable holding the analytics project identifier.
pub const PROJECT_ID_ENV: &str = "MIXPANEL_PROJECT_ID";

// ── Region ─────────────────────────────────────────────────────────────────────

/// Data residency region of the analytics project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Eu,
    Us,
    In,
}

impl Region {
    /// Base URL of the raw export host for this region.
    pub fn export_base_url(&self) -> &'static str {
        match self {
            Region::Eu => "https://data-eu.mixpanel.com",
            Region::Us => "https://data.mixpanel.com",
            Region::In => "https://data-in.mixpanel.com",
        }
    }
}

// ── Credentials ────────────────────────────────────────────────────────────────

/// Secrets needed for any export request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub project_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .finish()
    }
}

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Reconcile payment and refund events against a deal roster
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sales-recon",
    about = "Reconcile payment and refund events against a deal roster",
    version
)]
pub struct Settings {
    /// First day of the export window (YYYY-MM-DD, default: 7 days ago)
    #[arg(long = "from")]
    pub from_date: Option<String>,

    /// Last day of the export window (YYYY-MM-DD, default: today)
    #[arg(long = "to")]
    pub to_date: Option<String>,

    /// Basic-auth token for the export API
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Analytics project identifier
    #[arg(long, env = PROJECT_ID_ENV)]
    pub project_id: Option<String>,

    /// Data residency region of the project
    #[arg(long, value_enum, default_value = "eu")]
    pub region: Region,

    /// Override the export host (e.g. for a proxy)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Request timeout in seconds (1-600)
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..=600))]
    pub timeout_secs: u64,

    /// Attempts per export request for transient failures (1-10)
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: u32,

    /// Read raw newline-delimited export data from a file instead of the API
    #[arg(long)]
    pub export_file: Option<PathBuf>,

    /// Roster file (.csv or .xlsx) to merge with the reconciled events
    #[arg(long)]
    pub roster: Option<PathBuf>,

    /// Directory where merged_output.csv is written
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Payment event name
    #[arg(long, default_value = "New Payment Made")]
    pub payment_event: String,

    /// Refund event name
    #[arg(long, default_value = "Refund Granted")]
    pub refund_event: String,

    /// Payment amount property
    #[arg(long, default_value = "Amount")]
    pub amount_column: String,

    /// Refund property holding the customer email
    #[arg(long, default_value = "User Email")]
    pub refund_email_column: String,

    /// Refund amount property
    #[arg(long, default_value = "Refund Amount")]
    pub refund_amount_column: String,

    /// Preferred roster email column
    #[arg(long, default_value = "Person - Email - Work")]
    pub email_column: String,

    /// Roster email column used where the preferred one is empty
    #[arg(long, default_value = "Person - Email - Other")]
    pub fallback_email_column: String,

    /// Roster column used for the per-owner summary
    #[arg(long, default_value = "Deal - Owner")]
    pub owner_column: String,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved configuration
    #[arg(long)]
    pub clear: bool,
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// Persisted last-used parameters saved to `~/.sales-recon/last_used.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_column: Option<String>,
}

impl LastUsedParams {
    /// Return the default path to the persisted config file.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Return the config path rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &Path) -> PathBuf {
        base_dir.join(".sales-recon").join("last_used.json")
    }

    /// Load persisted params from an explicit path.
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write params to an explicit path.
    pub fn save_to(&self, path: &Path) -> std::result::Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the config file at an explicit path if it exists.
    pub fn clear_at(path: &Path) -> std::result::Result<(), std::io::Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments and merge with last-used params where no explicit
    /// CLI value was provided, then persist the result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Full implementation; accepts args and an explicit config path so that
    /// tests can redirect to a temporary directory.
    pub fn load_with_last_used_impl(args: Vec<std::ffi::OsString>, config_path: &Path) -> Self {
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            if let Err(e) = LastUsedParams::clear_at(config_path) {
                tracing::warn!(error = %e, "could not clear saved configuration");
            }
            return settings.apply_debug();
        }

        let last = LastUsedParams::load_from(config_path);

        // CLI always wins over persisted values.
        if !is_arg_explicitly_set(&matches, "region") {
            if let Some(v) = last.region {
                settings.region = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "output_dir") {
            if let Some(v) = last.output_dir {
                settings.output_dir = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "owner_column") {
            if let Some(v) = last.owner_column {
                settings.owner_column = v;
            }
        }

        settings = settings.apply_debug();

        if let Err(e) = LastUsedParams::from(&settings).save_to(config_path) {
            tracing::debug!(error = %e, "could not persist last-used parameters");
        }

        settings
    }

    /// `--debug` overrides the log level.
    fn apply_debug(mut self) -> Self {
        if self.debug {
            self.log_level = "DEBUG".to_string();
        }
        self
    }

    /// Resolve the export window against `today`.
    ///
    /// Missing `--to` means today; missing `--from` means seven days before
    /// today.
    pub fn window(&self, today: NaiveDate) -> Result<DateWindow> {
        let default = DateWindow::last_week(today);
        let start = match &self.from_date {
            Some(s) => parse_date(s)?,
            None => default.start(),
        };
        let end = match &self.to_date {
            Some(s) => parse_date(s)?,
            None => default.end(),
        };
        DateWindow::new(start, end, today)
    }

    /// Credentials for the export API; both must be present and non-blank.
    pub fn credentials(&self) -> Result<Credentials> {
        let api_key = non_blank(self.api_key.as_deref()).ok_or_else(|| {
            ReconError::Config(format!("{} is not set (use --api-key or the environment)", API_KEY_ENV))
        })?;
        let project_id = non_blank(self.project_id.as_deref()).ok_or_else(|| {
            ReconError::Config(format!(
                "{} is not set (use --project-id or the environment)",
                PROJECT_ID_ENV
            ))
        })?;
        Ok(Credentials {
            api_key: api_key.to_string(),
            project_id: project_id.to_string(),
        })
    }

    /// Export host, honouring `--base-url` over the region default.
    pub fn export_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.region.export_base_url().to_string())
    }

    pub fn columns(&self) -> ColumnConfig {
        ColumnConfig {
            payment: EventSpec {
                kind: EventKind::Payment,
                event_name: self.payment_event.clone(),
                identity: IdentitySource::DistinctId,
                amount_column: self.amount_column.clone(),
            },
            refund: EventSpec {
                kind: EventKind::Refund,
                event_name: self.refund_event.clone(),
                identity: IdentitySource::Column(self.refund_email_column.clone()),
                amount_column: self.refund_amount_column.clone(),
            },
            email_column: self.email_column.clone(),
            fallback_email_column: self.fallback_email_column.clone(),
            owner_column: self.owner_column.clone(),
        }
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            region: Some(s.region),
            output_dir: Some(s.output_dir.clone()),
            owner_column: Some(s.owner_column.clone()),
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────────

/// Returns `true` when `name` was supplied explicitly on the command line
/// (not via default value or environment variable).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
