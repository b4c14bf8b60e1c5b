mod cli;
mod infra;
mod routes;
mod score;
mod server;

use ielts_practice::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
