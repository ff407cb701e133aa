mod cli;
mod evaluate;
mod infra;
mod report;
mod routes;
mod server;

use campaign_engine::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
