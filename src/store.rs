//! Idempotent persistence of collected records.

use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::debug;

use crate::records::{FundingRecord, PriceRecord};
use crate::timeframe::Timeframe;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error in provider fields: {0}")]
    Json(#[from] serde_json::Error),
}

/// Keyed writes where re-inserting a stored record overwrites it in place.
///
/// Price rows are keyed by `(exchange, symbol, timeframe, timestamp_ms)`,
/// funding rows by `(exchange, symbol, timestamp_ms)`.
pub trait RecordStore {
    fn upsert_prices(
        &mut self,
        exchange: &str,
        timeframe: Timeframe,
        records: &[PriceRecord],
    ) -> Result<usize, StoreError>;

    fn upsert_funding(
        &mut self,
        exchange: &str,
        records: &[FundingRecord],
    ) -> Result<usize, StoreError>;
}

pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn count_prices(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "
            SELECT COUNT(*)
            FROM ohlcv
            WHERE exchange = ?1 AND symbol = ?2 AND timeframe = ?3
            ",
            params![exchange, symbol, timeframe.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_funding(&self, exchange: &str, symbol: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM funding_rates WHERE exchange = ?1 AND symbol = ?2",
            params![exchange, symbol],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// All stored candles for one series, ascending by timestamp.
    pub fn load_prices(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<PriceRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT timestamp_ms, open, high, low, close, volume, symbol, exchange
            FROM ohlcv
            WHERE exchange = ?1 AND symbol = ?2 AND timeframe = ?3
            ORDER BY timestamp_ms
            ",
        )?;
        let rows = stmt.query_map(params![exchange, symbol, timeframe.to_string()], |row| {
            Ok(PriceRecord {
                timestamp_ms: row.get(0)?,
                open: row.get(1)?,
                high: row.get(2)?,
                low: row.get(3)?,
                close: row.get(4)?,
                volume: row.get(5)?,
                symbol: row.get(6)?,
                exchange: row.get(7)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn load_funding(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<Vec<FundingRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT timestamp_ms, funding_rate, symbol, exchange, mark_price, premium, info
            FROM funding_rates
            WHERE exchange = ?1 AND symbol = ?2
            ORDER BY timestamp_ms
            ",
        )?;
        let rows = stmt.query_map(params![exchange, symbol], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (timestamp_ms, funding_rate, symbol, exchange, mark_price, premium, info) = row?;
            out.push(FundingRecord {
                timestamp_ms,
                funding_rate,
                symbol,
                exchange,
                mark_price,
                premium,
                info: serde_json::from_str(&info)?,
            });
        }
        Ok(out)
    }
}

impl RecordStore for SqliteRecordStore {
    fn upsert_prices(
        &mut self,
        exchange: &str,
        timeframe: Timeframe,
        records: &[PriceRecord],
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let timeframe = timeframe.to_string();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO ohlcv (
                    exchange,
                    symbol,
                    timeframe,
                    timestamp_ms,
                    open,
                    high,
                    low,
                    close,
                    volume
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(exchange, symbol, timeframe, timestamp_ms) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                ",
            )?;

            for record in records {
                stmt.execute(params![
                    exchange,
                    record.symbol,
                    timeframe,
                    record.timestamp_ms,
                    record.open,
                    record.high,
                    record.low,
                    record.close,
                    record.volume,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            component = "store",
            event = "store.upsert",
            kind = "ohlcv",
            exchange,
            timeframe = %timeframe,
            records = records.len()
        );
        Ok(records.len())
    }

    fn upsert_funding(
        &mut self,
        exchange: &str,
        records: &[FundingRecord],
    ) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO funding_rates (
                    exchange,
                    symbol,
                    timestamp_ms,
                    funding_rate,
                    mark_price,
                    premium,
                    info
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(exchange, symbol, timestamp_ms) DO UPDATE SET
                    funding_rate = excluded.funding_rate,
                    mark_price = excluded.mark_price,
                    premium = excluded.premium,
                    info = excluded.info
                ",
            )?;

            for record in records {
                let info = serde_json::to_string(&record.info)?;
                stmt.execute(params![
                    exchange,
                    record.symbol,
                    record.timestamp_ms,
                    record.funding_rate,
                    record.mark_price,
                    record.premium,
                    info,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            component = "store",
            event = "store.upsert",
            kind = "funding",
            exchange,
            records = records.len()
        );
        Ok(records.len())
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ohlcv (
            exchange TEXT NOT NULL,
            symbol TEXT NOT NULL,
            timeframe TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL,
            PRIMARY KEY(exchange, symbol, timeframe, timestamp_ms)
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS funding_rates (
            exchange TEXT NOT NULL,
            symbol TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            funding_rate REAL NOT NULL,
            mark_price REAL,
            premium REAL,
            info TEXT NOT NULL,
            PRIMARY KEY(exchange, symbol, timestamp_ms)
        ) WITHOUT ROWID;
        ",
    )?;
    Ok(())
}
