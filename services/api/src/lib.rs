mod cli;
mod infra;
mod routes;
mod server;

use vehicle_reminders::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
