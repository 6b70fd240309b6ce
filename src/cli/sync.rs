use super::ui;
use crate::App;
use crate::core::{InstrumentCode, SyncMeta};
use crate::sync::SyncOutcome;
use anyhow::Result;
use comfy_table::Cell;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn sync_one(
    app: &App,
    code: &InstrumentCode,
    force: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let spinner = ui::new_spinner(format!("Syncing {code}"));
    let result = app.service().trigger_sync(code, force, cancel).await;
    spinner.finish_and_clear();

    let outcome = result?;
    println!("{}", describe(&outcome));
    Ok(())
}

pub async fn sync_all(app: &App, force: bool, cancel: &CancellationToken) -> Result<()> {
    let total = app.service().list_instruments()?.len();
    if total == 0 {
        println!("No instruments tracked.");
        return Ok(());
    }

    let pb = ui::new_progress_bar(total as u64, true);
    let report = app
        .service()
        .trigger_sync_all(force, cancel, |outcome| {
            pb.set_message(outcome.instrument.to_string());
            pb.inc(1);
        })
        .await?;
    pb.finish_and_clear();

    for outcome in &report.outcomes {
        println!("{}", describe(outcome));
    }
    if report.cancelled {
        println!("{}", ui::style_text("Sync cancelled", ui::StyleType::Subtle));
    }
    if let Some(failure) = report.partial_failure() {
        println!("{}", ui::style_text(&failure.to_string(), ui::StyleType::Error));
    }
    Ok(())
}

fn describe(outcome: &SyncOutcome) -> String {
    let code = outcome.instrument.as_str();
    match (&outcome.error, outcome.from_date) {
        (Some(err), _) => ui::style_text(&format!("{code}: {err}"), ui::StyleType::Error),
        (None, None) => ui::style_text(&format!("{code}: already up to date"), ui::StyleType::Subtle),
        (None, Some(from)) => format!(
            "{code}: {} new of {} fetched ({from} to {})",
            outcome.inserted, outcome.fetched, outcome.to_date
        ),
    }
}

pub fn status(app: &App, code: Option<&InstrumentCode>) -> Result<()> {
    let instruments = app.service().list_instruments()?;
    let selected: Vec<_> = instruments
        .into_iter()
        .filter(|i| code.is_none_or(|c| &i.code == c))
        .collect();
    if selected.is_empty() {
        println!("No matching instruments tracked.");
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Code"),
        ui::header_cell("Name"),
        ui::header_cell("Status"),
        ui::header_cell("Synced through"),
        ui::header_cell("Last attempt"),
        ui::header_cell("Error"),
    ]);
    for instrument in &selected {
        let meta = app
            .service()
            .get_sync_status(&instrument.code)?
            .unwrap_or_else(SyncMeta::pending);
        table.add_row(vec![
            Cell::new(instrument.code.as_str()),
            Cell::new(&instrument.name),
            ui::status_cell(meta.status),
            ui::format_optional_cell(meta.last_sync_date, |d| d.to_string()),
            ui::format_optional_cell(meta.last_sync_time, |t| t.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(meta.error.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Runs the checkpoint scheduler until `cancel` fires.
pub async fn daemon(app: &App, cancel: CancellationToken) -> Result<()> {
    let settings = app.scheduler().settings();
    info!(
        "Watching {} instrument(s); checkpoints {:?}",
        app.service().list_instruments()?.len(),
        settings.checkpoints
    );
    app.scheduler().run(cancel).await;
    Ok(())
}
