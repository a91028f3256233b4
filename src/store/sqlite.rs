//! Primary time-series store. One connection, every batch committed in a
//! single transaction, upserts keyed so re-ingesting an identical batch
//! leaves row counts unchanged.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::ScanError;
use crate::model::bar::{Bar, Timeframe};
use crate::model::report::{AssetReport, StorageTier};

pub struct SqliteStore {
    conn: Connection,
}

/// Minimal view of a persisted signal row, used by readers and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRow {
    pub symbol: String,
    pub timeframe: String,
    pub action: String,
    pub current_price: f64,
    pub lower_band: f64,
    pub upper_band: f64,
    pub potential_return_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub degree: i64,
    pub k: f64,
    pub lookback: i64,
    pub bar_time_ms: i64,
    pub created_at_ms: i64,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ohlc (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                open_time_ms INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY(symbol, timeframe, open_time_ms)
            );

            CREATE TABLE IF NOT EXISTS signals (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                signal TEXT NOT NULL,
                current_price REAL NOT NULL,
                lower_band REAL NOT NULL,
                upper_band REAL NOT NULL,
                potential_return REAL NOT NULL,
                strength REAL NOT NULL,
                risk TEXT NOT NULL,
                total_return REAL NOT NULL,
                sharpe_ratio REAL NOT NULL,
                max_drawdown REAL NOT NULL,
                degree INTEGER NOT NULL,
                kstd REAL NOT NULL,
                lookback INTEGER NOT NULL,
                bar_time_ms INTEGER NOT NULL,
                batch_id TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY(symbol, timeframe, bar_time_ms)
            );

            CREATE TABLE IF NOT EXISTS optimization_trials (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                bar_time_ms INTEGER NOT NULL,
                trial_index INTEGER NOT NULL,
                degree INTEGER NOT NULL,
                kstd REAL NOT NULL,
                lookback INTEGER NOT NULL,
                objective_value REAL NOT NULL,
                valid INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY(symbol, timeframe, bar_time_ms, trial_index)
            );

            CREATE TABLE IF NOT EXISTS batches (
                window_key TEXT NOT NULL PRIMARY KEY,
                batch_id TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                record_count INTEGER NOT NULL,
                tier TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, ScanError> {
        Self::open(Path::new(":memory:"))
    }

    /// Upsert a batch of bars into the ohlc table.
    pub fn upsert_bars(&mut self, bars: &[Bar]) -> Result<(), ScanError> {
        let tx = self.conn.transaction()?;
        for bar in bars {
            tx.execute(
                r#"
                INSERT INTO ohlc (symbol, timeframe, open_time_ms, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(symbol, timeframe, open_time_ms) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                "#,
                params![
                    bar.symbol,
                    bar.timeframe.as_str(),
                    bar.open_time_ms as i64,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist one batch atomically: the batch row, every signal row, and
    /// the audit trail of optimizer trials, all in one transaction.
    pub fn write_batch(
        &mut self,
        batch_id: &str,
        window_key: &str,
        created_at_ms: u64,
        tier: StorageTier,
        records: &[AssetReport],
    ) -> Result<(), ScanError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO batches (window_key, batch_id, created_at_ms, record_count, tier)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(window_key) DO UPDATE SET
                batch_id = excluded.batch_id,
                created_at_ms = excluded.created_at_ms,
                record_count = excluded.record_count,
                tier = excluded.tier
            "#,
            params![
                window_key,
                batch_id,
                created_at_ms as i64,
                records.len() as i64,
                tier.as_str(),
            ],
        )?;

        for r in records {
            tx.execute(
                r#"
                INSERT INTO signals (
                    symbol, timeframe, signal, current_price, lower_band, upper_band,
                    potential_return, strength, risk, total_return, sharpe_ratio,
                    max_drawdown, degree, kstd, lookback, bar_time_ms, batch_id, created_at_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                ON CONFLICT(symbol, timeframe, bar_time_ms) DO UPDATE SET
                    signal = excluded.signal,
                    current_price = excluded.current_price,
                    lower_band = excluded.lower_band,
                    upper_band = excluded.upper_band,
                    potential_return = excluded.potential_return,
                    strength = excluded.strength,
                    risk = excluded.risk,
                    total_return = excluded.total_return,
                    sharpe_ratio = excluded.sharpe_ratio,
                    max_drawdown = excluded.max_drawdown,
                    degree = excluded.degree,
                    kstd = excluded.kstd,
                    lookback = excluded.lookback,
                    batch_id = excluded.batch_id,
                    created_at_ms = excluded.created_at_ms
                "#,
                params![
                    r.symbol,
                    r.timeframe.as_str(),
                    r.action.as_str(),
                    r.current_price,
                    r.lower_band,
                    r.upper_band,
                    r.potential_return_pct,
                    r.strength,
                    r.risk.as_str(),
                    r.total_return_pct,
                    r.sharpe_ratio,
                    r.max_drawdown_pct,
                    r.params.degree as i64,
                    r.params.k,
                    r.params.lookback as i64,
                    r.bar_time_ms as i64,
                    batch_id,
                    created_at_ms as i64,
                ],
            )?;

            for t in &r.trials {
                tx.execute(
                    r#"
                    INSERT INTO optimization_trials (
                        symbol, timeframe, bar_time_ms, trial_index, degree, kstd,
                        lookback, objective_value, valid, created_at_ms
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(symbol, timeframe, bar_time_ms, trial_index) DO UPDATE SET
                        degree = excluded.degree,
                        kstd = excluded.kstd,
                        lookback = excluded.lookback,
                        objective_value = excluded.objective_value,
                        valid = excluded.valid,
                        created_at_ms = excluded.created_at_ms
                    "#,
                    params![
                        r.symbol,
                        r.timeframe.as_str(),
                        r.bar_time_ms as i64,
                        t.trial_index as i64,
                        t.degree as i64,
                        t.k,
                        t.lookback as i64,
                        t.objective,
                        t.valid as i64,
                        created_at_ms as i64,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn signal_count(&self) -> Result<usize, ScanError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn batch_count(&self) -> Result<usize, ScanError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM batches", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Signals from the most recently committed batch only.
    pub fn latest_signals(&self) -> Result<Vec<SignalRow>, ScanError> {
        let latest: Option<String> = self
            .conn
            .query_row(
                "SELECT batch_id FROM batches ORDER BY created_at_ms DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        let Some(batch_id) = latest else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT symbol, timeframe, signal, current_price, lower_band, upper_band,
                   potential_return, sharpe_ratio, max_drawdown, degree, kstd,
                   lookback, bar_time_ms, created_at_ms
            FROM signals
            WHERE batch_id = ?1
            ORDER BY symbol ASC
            "#,
        )?;
        let rows = stmt.query_map([&batch_id], |row| {
            Ok(SignalRow {
                symbol: row.get(0)?,
                timeframe: row.get(1)?,
                action: row.get(2)?,
                current_price: row.get(3)?,
                lower_band: row.get(4)?,
                upper_band: row.get(5)?,
                potential_return_pct: row.get(6)?,
                sharpe_ratio: row.get(7)?,
                max_drawdown_pct: row.get(8)?,
                degree: row.get(9)?,
                k: row.get(10)?,
                lookback: row.get(11)?,
                bar_time_ms: row.get(12)?,
                created_at_ms: row.get(13)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn latest_price(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<f64>, ScanError> {
        let price = self
            .conn
            .query_row(
                r#"
                SELECT close FROM ohlc
                WHERE symbol = ?1 AND timeframe = ?2
                ORDER BY open_time_ms DESC LIMIT 1
                "#,
                params![symbol, timeframe.as_str()],
                |row| row.get::<_, f64>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(price)
    }

    /// Delete batches and their rows older than the retention cutoff.
    /// Returns (batches, signals, trials) removed.
    pub fn purge_older_than(&mut self, cutoff_ms: u64) -> Result<(usize, usize, usize), ScanError> {
        let tx = self.conn.transaction()?;
        let trials = tx.execute(
            "DELETE FROM optimization_trials WHERE created_at_ms < ?1",
            params![cutoff_ms as i64],
        )?;
        let signals = tx.execute(
            "DELETE FROM signals WHERE created_at_ms < ?1",
            params![cutoff_ms as i64],
        )?;
        let batches = tx.execute(
            "DELETE FROM batches WHERE created_at_ms < ?1",
            params![cutoff_ms as i64],
        )?;
        tx.commit()?;
        Ok((batches, signals, trials))
    }
}
