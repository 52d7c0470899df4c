//! Candle CSV loading for the `backtest`/`report` CLI commands. Expects
//! columns `timestamp,open,high,low,close,volume`, where `timestamp` is
//! either an RFC 3339 datetime or raw epoch-seconds integer.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::types::{Candle, Symbol};

pub fn load_candles(path: impl AsRef<Path>, exchange: &str, symbol: &Symbol, timeframe: &str) -> Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path.as_ref()).context("failed to open candle CSV file")?;

    let mut candles = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("failed to read CSV row {}", row_idx + 1))?;

        let timestamp_field = record.get(0).context("missing timestamp column")?;
        let timestamp = parse_timestamp(timestamp_field)
            .with_context(|| format!("failed to parse timestamp: {timestamp_field}"))?;

        let open: f64 = record.get(1).context("missing open column")?.parse().context("invalid open")?;
        let high: f64 = record.get(2).context("missing high column")?.parse().context("invalid high")?;
        let low: f64 = record.get(3).context("missing low column")?.parse().context("invalid low")?;
        let close: f64 = record.get(4).context("missing close column")?.parse().context("invalid close")?;
        let volume: f64 = record.get(5).context("missing volume column")?.parse().context("invalid volume")?;

        let candle = Candle::new(exchange, symbol.clone(), timeframe, timestamp, open, high, low, close, volume)
            .with_context(|| format!("row {} failed candle validation", row_idx + 1))?;
        candles.push(candle);
    }

    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

fn parse_timestamp(field: &str) -> Result<i64> {
    if let Ok(epoch) = field.parse::<i64>() {
        return Ok(epoch);
    }
    let dt: DateTime<Utc> = field.parse().context("not a valid epoch integer or RFC3339 datetime")?;
    Ok(dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_epoch_and_sorts_by_timestamp() {
        let file = tempfile_with_contents(
            "timestamp,open,high,low,close,volume\n\
             3600,101,102,100,101.5,10\n\
             0,100,101,99,100.5,10\n",
        );
        let symbol = Symbol::new("BTCUSDT");
        let candles = load_candles(file.path(), "binance", &symbol, "1h").unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, 0);
        assert_eq!(candles[1].timestamp, 3600);
    }

    #[test]
    fn loads_rfc3339_timestamps() {
        let file = tempfile_with_contents(
            "timestamp,open,high,low,close,volume\n\
             2024-01-01T00:00:00Z,100,101,99,100.5,10\n",
        );
        let symbol = Symbol::new("BTCUSDT");
        let candles = load_candles(file.path(), "binance", &symbol, "1h").unwrap();
        assert_eq!(candles.len(), 1);
    }

    fn tempfile_with_contents(contents: &str) -> tempfile_stub::NamedTempFile {
        tempfile_stub::NamedTempFile::new(contents)
    }

    /// Minimal stand-in for a temp-file helper crate: writes to a uniquely
    /// named file under the OS temp directory and removes it on drop.
    mod tempfile_stub {
        use std::fs::File;
        use std::io::Write;
        use std::path::{Path, PathBuf};

        pub struct NamedTempFile {
            path: PathBuf,
        }

        impl NamedTempFile {
            pub fn new(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("csv-loader-test-{}.csv", rand::random::<u64>()));
                let mut file = File::create(&path).unwrap();
                file.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }

            pub fn path(&self) -> &Path {
                &self.path
            }
        }

        impl Drop for NamedTempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}
