use std::env;

use chrono::Duration as ChronoDuration;
use sqlx::{PgPool, Row};
use transactional_outbox::{OutboxConfig, PgRecordStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage:");
        eprintln!("  outbox-cli migrate <DATABASE_URL>");
        eprintln!("  outbox-cli stats <DATABASE_URL>");
        eprintln!("  outbox-cli reset-locks <DATABASE_URL>");
        eprintln!("  outbox-cli sweep-retention <DATABASE_URL> <horizon_days>");
        std::process::exit(1);
    }

    let cmd = args[1].as_str();

    match cmd {
        "migrate" if args.len() == 3 => {
            let pool = PgPool::connect(&args[2]).await?;
            let store = PgRecordStore::new(pool, OutboxConfig::default());
            store.run_migrations().await?;
            println!("migrations applied");
        }
        "stats" if args.len() == 3 => {
            let pool = PgPool::connect(&args[2]).await?;
            let row = sqlx::query(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'PROCESSING')::BIGINT AS pending,
                    COUNT(*) FILTER (WHERE status = 'SENT')::BIGINT AS sent,
                    COALESCE(EXTRACT(EPOCH FROM (now() - MIN(created_at) FILTER (WHERE status = 'PROCESSING')))::BIGINT, 0) AS oldest_pending_age_seconds
                FROM outbox
                "#,
            )
            .fetch_one(&pool)
            .await?;

            let pending: i64 = row.try_get("pending")?;
            let sent: i64 = row.try_get("sent")?;
            let oldest_pending_age_seconds: i64 = row.try_get("oldest_pending_age_seconds")?;

            println!("pending: {pending}");
            println!("sent: {sent}");
            println!("oldest_pending_age_seconds: {oldest_pending_age_seconds}");
        }
        "reset-locks" if args.len() == 3 => {
            let pool = PgPool::connect(&args[2]).await?;
            let result = sqlx::query(
                r#"
                UPDATE outbox
                SET lock_expires_at = now(), next_attempt_after = now()
                WHERE status = 'PROCESSING'
                "#,
            )
            .execute(&pool)
            .await?;
            println!("reset {} stuck record(s) for immediate reclaim", result.rows_affected());
        }
        "sweep-retention" if args.len() == 4 => {
            let pool = PgPool::connect(&args[2]).await?;
            let horizon_days: i64 = args[3].parse()?;
            let store = PgRecordStore::new(pool, OutboxConfig::default());
            let deleted = store
                .delete_retained_past(ChronoDuration::days(horizon_days))
                .await?;
            println!("deleted {deleted} sent record(s) past the retention horizon");
        }
        _ => {
            eprintln!("Invalid arguments");
            std::process::exit(1);
        }
    }

    Ok(())
}
