//! Applies the embedded SQL migrations and exits. Runs before the consumer
//! starts in container deployments.

use anyhow::Result;
use eventid_common::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    println!("Running database migrations...");

    let pool = eventid_events::connect(&config).await?;
    eventid_events::migrate(&pool).await?;

    println!("Migrations completed successfully.");

    Ok(())
}
