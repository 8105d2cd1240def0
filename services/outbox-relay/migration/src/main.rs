use sea_orm_migration::prelude::*;

use clinic_outbox_migration::Migrator;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
