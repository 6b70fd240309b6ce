use super::ui;
use crate::App;
use crate::core::InstrumentCode;
use crate::service::NewInstrument;
use anyhow::{Result, bail};
use comfy_table::Cell;
use tokio_util::sync::CancellationToken;

/// Registers the instrument, then fetches its history right away.
pub async fn add(app: &App, new: NewInstrument, cancel: CancellationToken) -> Result<()> {
    let instrument = app.service().add_instrument(new, &cancel).await?;
    println!(
        "Tracking {} {}",
        ui::style_text(instrument.code.as_str(), ui::StyleType::Title),
        instrument.name
    );

    let spinner = ui::new_spinner(format!("Fetching history for {}", instrument.code));
    let result = app
        .service()
        .spawn_sync(instrument.code.clone(), cancel)
        .await?;
    spinner.finish_and_clear();

    match result {
        Ok(outcome) => println!(
            "{}",
            ui::style_text(
                &format!("Cached {} valuations", outcome.inserted),
                ui::StyleType::Success
            )
        ),
        // Registration stands; the scheduler or `sync` retries later
        Err(e) => println!(
            "{}",
            ui::style_text(&format!("Initial sync failed: {e}"), ui::StyleType::Error)
        ),
    }
    Ok(())
}

pub fn remove(app: &App, code: &InstrumentCode) -> Result<()> {
    if !app.service().remove_instrument(code)? {
        bail!("Instrument {} is not tracked", code);
    }
    println!("Removed {code} and its cached history");
    Ok(())
}

pub fn list(app: &App) -> Result<()> {
    let instruments = app.service().list_instruments()?;
    if instruments.is_empty() {
        println!("No instruments tracked. Add one with `fundsync add <code>`.");
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Code"),
        ui::header_cell("Name"),
        ui::header_cell("Category"),
        ui::header_cell("Risk"),
        ui::header_cell("Inception"),
        ui::header_cell("Added"),
    ]);
    for instrument in &instruments {
        table.add_row(vec![
            Cell::new(instrument.code.as_str()),
            Cell::new(&instrument.name),
            Cell::new(instrument.category.as_deref().unwrap_or("-")),
            Cell::new(instrument.risk.as_deref().unwrap_or("-")),
            ui::format_optional_cell(instrument.inception, |d| d.to_string()),
            Cell::new(instrument.added_at.format("%Y-%m-%d").to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}
