mod cli;
mod demo;
mod infra;

use licensing::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
