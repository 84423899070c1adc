//! Store bootstrap: open the SQLite pool and bring the auction schema up.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on the database write lock before giving up.
/// Contending bid commits queue here instead of failing on first contact;
/// anything that outlasts it surfaces as a busy error for the arbiter's
/// retry loop.
const WRITE_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the auction database and apply the schema.
///
/// WAL mode keeps auction reads (listing pages, snapshot fallbacks) moving
/// while a bid commit holds the write lock. Foreign keys are enforced so a
/// bid row can never outlive its auction.
pub async fn init_db(db_path: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(WRITE_LOCK_WAIT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    apply_schema(&pool).await?;

    info!(db_path, "auction store ready");
    Ok(pool)
}

/// The schema ships inside the binary and every statement is
/// `IF NOT EXISTS`, so reapplying on each boot is safe and doubles as the
/// migration path for fresh columns going out with a release.
async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(include_str!("schema.sql")).execute(pool).await?;
    Ok(())
}
