pub mod config;
pub mod error;
pub mod reminders;
pub mod telemetry;
