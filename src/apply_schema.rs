use sqlx::PgPool;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let database_url = env::var("DATABASE_URL")
        .expect("DATABASE_URL environment variable must be set");

    let pool = PgPool::connect(&database_url).await?;

    // Read and execute the audit log schema file
    let schema_sql = std::fs::read_to_string("audit_schema.sql")?;

    println!("Applying audit pipeline schema (audit_log, audit_integrity_log, alerts, audit_retention_policy)...");
    sqlx::raw_sql(&schema_sql).execute(&pool).await?;

    println!("Schema applied successfully!");

    pool.close().await;
    Ok(())
}