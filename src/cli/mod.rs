pub mod chart;
pub mod instruments;
pub mod setup;
pub mod sync;
pub mod ui;
