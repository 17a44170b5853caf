use council_core::{CouncilError, CouncilResult};
use sqlx::AnyPool;

/// Durable-tier tables and indexes, created on startup. Statements are
/// portable across the Postgres and SQLite Any backends.
const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cached_data (
        symbol TEXT NOT NULL,
        data_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        source TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        schema_version TEXT NOT NULL,
        PRIMARY KEY (symbol, data_type)
    )",
    "CREATE INDEX IF NOT EXISTS idx_cached_data_expires ON cached_data (expires_at)",
    "CREATE TABLE IF NOT EXISTS stock_info (
        symbol TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        market TEXT NOT NULL,
        industry TEXT,
        currency TEXT,
        exchange TEXT,
        list_date TEXT,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS stock_data (
        symbol TEXT NOT NULL,
        date TEXT NOT NULL,
        open DOUBLE PRECISION NOT NULL,
        high DOUBLE PRECISION NOT NULL,
        low DOUBLE PRECISION NOT NULL,
        close DOUBLE PRECISION NOT NULL,
        volume DOUBLE PRECISION NOT NULL,
        amount DOUBLE PRECISION,
        source TEXT NOT NULL,
        PRIMARY KEY (symbol, date)
    )",
    "CREATE INDEX IF NOT EXISTS idx_stock_data_symbol_date ON stock_data (symbol, date)",
    "CREATE TABLE IF NOT EXISTS fundamentals (
        symbol TEXT NOT NULL,
        report_date TEXT NOT NULL,
        ratios TEXT NOT NULL,
        source TEXT NOT NULL,
        PRIMARY KEY (symbol, report_date)
    )",
    "CREATE TABLE IF NOT EXISTS news (
        symbol TEXT NOT NULL,
        title TEXT NOT NULL,
        publish_time TEXT NOT NULL,
        content TEXT NOT NULL,
        source TEXT NOT NULL,
        url TEXT,
        sentiment DOUBLE PRECISION,
        PRIMARY KEY (symbol, title, publish_time)
    )",
    "CREATE INDEX IF NOT EXISTS idx_news_symbol_time ON news (symbol, publish_time)",
    "CREATE TABLE IF NOT EXISTS data_reports (
        report_date TEXT NOT NULL,
        symbol TEXT NOT NULL,
        data_type TEXT NOT NULL,
        source TEXT NOT NULL,
        record_count BIGINT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (report_date, symbol, data_type)
    )",
];

pub async fn init_schema(pool: &AnyPool) -> CouncilResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| CouncilError::Internal(format!("schema init failed: {e}")))?;
    }
    tracing::info!("durable tier schema ready");
    Ok(())
}
