use super::ui;
use crate::App;
use crate::core::{ChartPeriod, InstrumentCode};
use anyhow::Result;
use comfy_table::Cell;

/// Prints the most recent `rows` valuations of the cached series with the
/// indicators computed over the whole period.
pub fn run(app: &App, code: &InstrumentCode, period: ChartPeriod, rows: usize) -> Result<()> {
    let series = app.service().get_chart_series(code, period)?;
    if series.is_empty() {
        println!("No cached history for {code}. Run `fundsync sync {code}` first.");
        return Ok(());
    }

    let name = app
        .service()
        .get_instrument(code)?
        .map(|i| i.name)
        .unwrap_or_default();
    println!(
        "{} {} ({}, {} valuations)",
        ui::style_text(code.as_str(), ui::StyleType::Title),
        name,
        period,
        series.values.len()
    );

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Value"),
        ui::header_cell("Change"),
        ui::header_cell("MA5"),
        ui::header_cell("MA20"),
        ui::header_cell("RSI"),
        ui::header_cell("MACD"),
    ]);

    let ind = &series.indicators;
    let start = series.values.len().saturating_sub(rows);
    for i in start..series.values.len() {
        let change = (i > 0).then(|| {
            let prev = series.values[i - 1];
            (series.values[i] - prev) / prev * 100.0
        });
        table.add_row(vec![
            Cell::new(series.dates[i].to_string()),
            Cell::new(format!("{:.4}", series.values[i])),
            ui::change_cell(change),
            ui::format_optional_cell(ind.ma5[i], |v| format!("{v:.4}")),
            ui::format_optional_cell(ind.ma20[i], |v| format!("{v:.4}")),
            ui::format_optional_cell(ind.rsi[i], |v| format!("{v:.1}")),
            ui::format_optional_cell(ind.macd.histogram[i], |v| format!("{v:.4}")),
        ]);
    }
    println!("{table}");
    Ok(())
}
