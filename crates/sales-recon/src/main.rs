mod bootstrap;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use recon_core::formatting::format_amount;
use recon_core::models::{ReconciledTable, SummaryOutcome};
use recon_core::settings::Settings;
use recon_data::export::write_merged_csv;
use recon_data::fetcher::ExportClient;
use recon_data::roster::load_roster;
use recon_runtime::{
    EventSource, FetchOutcome, ReconRuntime, RetryPolicy, SessionId, SessionStore,
};

/// Reconciled rows printed before the totals line.
const TOP_ROWS: usize = 10;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    dotenv::dotenv().ok();
    let settings = Settings::load_with_last_used();

    bootstrap::ensure_directories()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("sales-recon v{} starting", env!("CARGO_PKG_VERSION"));

    execute(&settings, chrono::Local::now().date_naive()).await
}

/// One reconciliation run. The window is validated before any client is built.
async fn execute(settings: &Settings, today: NaiveDate) -> Result<()> {
    let window = settings.window(today)?;

    let source = match &settings.export_file {
        Some(path) => EventSource::File(path.clone()),
        None => {
            let client = ExportClient::new(
                settings.export_base_url(),
                settings.credentials()?,
                Duration::from_secs(settings.timeout_secs),
            )?;
            EventSource::Remote(client)
        }
    };

    let runtime = ReconRuntime::new(source, settings.columns()).with_retry(RetryPolicy {
        max_attempts: settings.max_attempts,
        ..RetryPolicy::default()
    });
    let mut store = SessionStore::new();
    let session = SessionId::new("cli");

    let snapshot = match runtime.refresh(&mut store, &session, &window).await? {
        FetchOutcome::Ready(snapshot) => snapshot,
        FetchOutcome::Empty => {
            println!("No data returned for the selected date range.");
            return Ok(());
        }
    };

    println!("Reconciled events for {}", window);
    print_reconciled(&snapshot.table)?;

    let coercion_failures =
        snapshot.payment_stats.coercion_failures + snapshot.refund_stats.coercion_failures;
    if coercion_failures > 0 {
        println!("Note: {} amount(s) were not numeric and counted as 0.", coercion_failures);
    }

    let Some(roster_path) = &settings.roster else {
        return Ok(());
    };

    let roster = load_roster(roster_path)?;
    let report = runtime.merge(&store, &session, &roster)?;

    println!();
    println!(
        "Merged {} roster rows ({} with payments or refunds)",
        report.merged.len(),
        report.merged.matched_count()
    );
    match &report.summary {
        SummaryOutcome::Produced(rows) => {
            println!("{:<30} {:>15} {:>15}", "Owner", "Paid", "Refunded");
            for row in rows {
                println!(
                    "{:<30} {:>15} {:>15}",
                    row.owner,
                    format_amount(row.total_paid),
                    format_amount(row.total_refund)
                );
            }
        }
        SummaryOutcome::OwnerColumnMissing { column } => {
            println!("Warning: '{}' column not found in the uploaded file.", column);
        }
    }

    let out = write_merged_csv(&report.merged, &settings.output_dir)
        .with_context(|| format!("writing merged CSV to {}", settings.output_dir.display()))?;
    println!("Merged file written to {}", out.display());

    Ok(())
}

fn print_reconciled(table: &ReconciledTable) -> Result<()> {
    println!("{:<40} {:>15} {:>15}", "Email", "Paid", "Refunded");
    for row in table.rows().iter().take(TOP_ROWS) {
        println!(
            "{:<40} {:>15} {:>15}",
            row.email,
            format_amount(row.paid_amount),
            format_amount(row.refund_amount)
        );
    }
    if table.len() > TOP_ROWS {
        println!("... and {} more", table.len() - TOP_ROWS);
    }
    println!(
        "{:<40} {:>15} {:>15}",
        format!("Total ({} emails)", table.len()),
        format_amount(table.total_paid()?),
        format_amount(table.total_refunded()?)
    );
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
