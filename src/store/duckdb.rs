//! Analytical tier. Holds the full signal history for ad-hoc querying;
//! writes are best-effort and never gate a batch commit.

use std::path::Path;

use duckdb::{params, Connection};

use crate::error::ScanError;
use crate::model::report::AssetReport;

pub struct DuckDbStore {
    conn: Connection,
}

impl DuckDbStore {
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS signal_history (
                symbol VARCHAR NOT NULL,
                timeframe VARCHAR NOT NULL,
                bar_time_ms BIGINT NOT NULL,
                signal VARCHAR NOT NULL,
                current_price DOUBLE NOT NULL,
                lower_band DOUBLE NOT NULL,
                upper_band DOUBLE NOT NULL,
                potential_return DOUBLE NOT NULL,
                total_return DOUBLE NOT NULL,
                sharpe_ratio DOUBLE NOT NULL,
                max_drawdown DOUBLE NOT NULL,
                degree BIGINT NOT NULL,
                kstd DOUBLE NOT NULL,
                lookback BIGINT NOT NULL,
                batch_id VARCHAR NOT NULL,
                created_at_ms BIGINT NOT NULL,
                PRIMARY KEY(symbol, timeframe, bar_time_ms)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn append_batch(
        &mut self,
        batch_id: &str,
        created_at_ms: u64,
        records: &[AssetReport],
    ) -> Result<(), ScanError> {
        let tx = self.conn.transaction()?;
        for r in records {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO signal_history (
                    symbol, timeframe, bar_time_ms, signal, current_price, lower_band,
                    upper_band, potential_return, total_return, sharpe_ratio,
                    max_drawdown, degree, kstd, lookback, batch_id, created_at_ms
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    r.symbol,
                    r.timeframe.as_str(),
                    r.bar_time_ms as i64,
                    r.action.as_str(),
                    r.current_price,
                    r.lower_band,
                    r.upper_band,
                    r.potential_return_pct,
                    r.total_return_pct,
                    r.sharpe_ratio,
                    r.max_drawdown_pct,
                    r.params.degree as i64,
                    r.params.k,
                    r.params.lookback as i64,
                    batch_id,
                    created_at_ms as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn history_count(&self) -> Result<usize, ScanError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM signal_history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn purge_older_than(&mut self, cutoff_ms: u64) -> Result<usize, ScanError> {
        let removed = self.conn.execute(
            "DELETE FROM signal_history WHERE created_at_ms < ?",
            params![cutoff_ms as i64],
        )?;
        Ok(removed)
    }
}
