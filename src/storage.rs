//! Embedded relational persistence: candle archival, backtest result
//! history, and the credential vault. A single SQLite connection behind an
//! `Arc<Mutex<..>>`, WAL mode, parameterized queries throughout.

use std::path::Path;
use std::sync::{Arc, Mutex};

use aes::Aes256;
use anyhow::{Context, Result};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chrono::Utc;
use rand::RngCore;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::Candle;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// `(exchange, symbol, timeframe, timestamp)` candle archive plus backtest
/// result history, backed by one SQLite file opened in WAL mode.
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.create_tables()?;
        Ok(storage)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS candles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                UNIQUE(exchange, symbol, timeframe, timestamp)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_candles_lookup
             ON candles(exchange, symbol, timeframe, timestamp)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS backtest_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipe_name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                created_at TEXT NOT NULL,
                report_json TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS credentials (
                exchange TEXT PRIMARY KEY,
                ciphertext_hex TEXT NOT NULL,
                iv_hex TEXT NOT NULL
            )",
            [],
        )?;

        debug!("storage schema created/verified");
        Ok(())
    }
}

/// Historical candle archive. Insert is an upsert keyed on
/// `(exchange, symbol, timeframe, timestamp)`.
pub trait CandleStore {
    fn insert(&self, candles: &[Candle]) -> Result<()>;
    fn get(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        start_time_sec: i64,
        end_time_sec: i64,
    ) -> Result<Vec<Candle>>;
    fn count(&self, exchange: &str, symbol: &str, timeframe: &str) -> Result<usize>;
    fn clear(&self, exchange: &str, symbol: &str, timeframe: &str) -> Result<()>;
}

impl CandleStore for Storage {
    fn insert(&self, candles: &[Candle]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for candle in candles {
            conn.execute(
                "INSERT INTO candles
                 (exchange, symbol, timeframe, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(exchange, symbol, timeframe, timestamp)
                 DO UPDATE SET open=excluded.open, high=excluded.high, low=excluded.low,
                     close=excluded.close, volume=excluded.volume",
                params![
                    candle.exchange,
                    candle.symbol.as_str(),
                    candle.timeframe,
                    candle.timestamp,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                ],
            )?;
        }
        Ok(())
    }

    fn get(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        start_time_sec: i64,
        end_time_sec: i64,
    ) -> Result<Vec<Candle>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT exchange, symbol, timeframe, timestamp, open, high, low, close, volume
             FROM candles
             WHERE exchange = ?1 AND symbol = ?2 AND timeframe = ?3
               AND timestamp >= ?4 AND timestamp < ?5
             ORDER BY timestamp ASC",
        )?;

        let rows = stmt.query_map(
            params![exchange, symbol, timeframe, start_time_sec, end_time_sec],
            |row| {
                let exchange: String = row.get(0)?;
                let symbol: String = row.get(1)?;
                let timeframe: String = row.get(2)?;
                let timestamp: i64 = row.get(3)?;
                let open: f64 = row.get(4)?;
                let high: f64 = row.get(5)?;
                let low: f64 = row.get(6)?;
                let close: f64 = row.get(7)?;
                let volume: f64 = row.get(8)?;
                Ok((exchange, symbol, timeframe, timestamp, open, high, low, close, volume))
            },
        )?;

        let mut candles = Vec::new();
        for row in rows {
            let (exchange, symbol, timeframe, timestamp, open, high, low, close, volume) = row?;
            if let Ok(candle) = Candle::new(
                exchange,
                crate::types::Symbol::new(symbol),
                timeframe,
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            ) {
                candles.push(candle);
            }
        }
        Ok(candles)
    }

    fn count(&self, exchange: &str, symbol: &str, timeframe: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM candles WHERE exchange = ?1 AND symbol = ?2 AND timeframe = ?3",
            params![exchange, symbol, timeframe],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn clear(&self, exchange: &str, symbol: &str, timeframe: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM candles WHERE exchange = ?1 AND symbol = ?2 AND timeframe = ?3",
            params![exchange, symbol, timeframe],
        )?;
        Ok(())
    }
}

/// Persisted backtest reports, listed newest-first.
pub trait BacktestResultStore {
    fn insert_result(&self, recipe_name: &str, symbol: &str, report_json: &serde_json::Value) -> Result<()>;
    fn list(&self) -> Result<Vec<StoredBacktestResult>>;
}

#[derive(Debug, Clone)]
pub struct StoredBacktestResult {
    pub recipe_name: String,
    pub symbol: String,
    pub created_at: String,
    pub report: serde_json::Value,
}

impl BacktestResultStore for Storage {
    fn insert_result(&self, recipe_name: &str, symbol: &str, report_json: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO backtest_results (recipe_name, symbol, created_at, report_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                recipe_name,
                symbol,
                Utc::now().to_rfc3339(),
                serde_json::to_string(report_json)?,
            ],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<StoredBacktestResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT recipe_name, symbol, created_at, report_json
             FROM backtest_results ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let recipe_name: String = row.get(0)?;
            let symbol: String = row.get(1)?;
            let created_at: String = row.get(2)?;
            let report_json: String = row.get(3)?;
            Ok((recipe_name, symbol, created_at, report_json))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (recipe_name, symbol, created_at, report_json) = row?;
            results.push(StoredBacktestResult {
                recipe_name,
                symbol,
                created_at,
                report: serde_json::from_str(&report_json).unwrap_or(serde_json::Value::Null),
            });
        }
        Ok(results)
    }
}

/// Symmetric-encryption credential store. Key = SHA-256(salt ++ hostname);
/// basic obfuscation against casual disk inspection, not a
/// hardware-backed secrets vault.
pub trait CredentialVault {
    fn save(&self, exchange: &str, api_key: &str, api_secret: &str) -> Result<()>;
    fn load(&self, exchange: &str) -> Result<Option<(String, String)>>;
    fn has(&self, exchange: &str) -> Result<bool>;
    fn delete(&self, exchange: &str) -> Result<()>;
}

const VAULT_SALT: &str = "crypto-backtest-engine-credential-salt-v1";

fn derive_key() -> [u8; 32] {
    let hostname = hostname_string();
    let mut hasher = Sha256::new();
    hasher.update(VAULT_SALT.as_bytes());
    hasher.update(hostname.as_bytes());
    hasher.finalize().into()
}

fn hostname_string() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

fn encrypt(plaintext: &str) -> (String, String) {
    let key = derive_key();
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    (hex::encode(ciphertext), hex::encode(iv))
}

fn decrypt(ciphertext_hex: &str, iv_hex: &str) -> Result<String> {
    let key = derive_key();
    let ciphertext = hex::decode(ciphertext_hex).context("invalid ciphertext hex")?;
    let iv = hex::decode(iv_hex).context("invalid iv hex")?;
    let iv: [u8; 16] = iv.try_into().map_err(|_| anyhow::anyhow!("iv must be 16 bytes"))?;

    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| anyhow::anyhow!("credential decryption failed: {e}"))?;

    String::from_utf8(plaintext).context("decrypted credential is not valid utf8")
}

impl CredentialVault for Storage {
    fn save(&self, exchange: &str, api_key: &str, api_secret: &str) -> Result<()> {
        let combined = format!("{api_key}\u{1}{api_secret}");
        let (ciphertext_hex, iv_hex) = encrypt(&combined);

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO credentials (exchange, ciphertext_hex, iv_hex)
             VALUES (?1, ?2, ?3)",
            params![exchange, ciphertext_hex, iv_hex],
        )?;
        Ok(())
    }

    fn load(&self, exchange: &str) -> Result<Option<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT ciphertext_hex, iv_hex FROM credentials WHERE exchange = ?1",
                params![exchange],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((ciphertext_hex, iv_hex)) = row else {
            return Ok(None);
        };

        let combined = decrypt(&ciphertext_hex, &iv_hex)?;
        let mut parts = combined.splitn(2, '\u{1}');
        let api_key = parts.next().unwrap_or_default().to_string();
        let api_secret = parts.next().unwrap_or_default().to_string();
        Ok(Some((api_key, api_secret)))
    }

    fn has(&self, exchange: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM credentials WHERE exchange = ?1",
            params![exchange],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn delete(&self, exchange: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM credentials WHERE exchange = ?1", params![exchange])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbol;

    fn temp_storage() -> Storage {
        let mut path = std::env::temp_dir();
        path.push(format!("engine-test-{}.db", hex::encode(rand::random::<[u8; 8]>())));
        Storage::open(path).unwrap()
    }

    #[test]
    fn candle_insert_is_an_upsert_on_the_uniqueness_key() {
        let storage = temp_storage();
        let symbol = Symbol::new("BTCUSDT");
        let candle = Candle::new("binance", symbol.clone(), "1h", 1000, 10.0, 12.0, 9.0, 11.0, 100.0).unwrap();
        storage.insert(&[candle]).unwrap();

        let updated = Candle::new("binance", symbol.clone(), "1h", 1000, 10.0, 12.0, 9.0, 11.5, 100.0).unwrap();
        storage.insert(&[updated]).unwrap();

        assert_eq!(storage.count("binance", "BTCUSDT", "1h").unwrap(), 1);
        let fetched = storage.get("binance", "BTCUSDT", "1h", 0, 2000).unwrap();
        assert_eq!(fetched[0].close, 11.5);
    }

    #[test]
    fn backtest_results_list_newest_first() {
        let storage = temp_storage();
        storage.insert_result("recipe-a", "BTCUSDT", &serde_json::json!({"v": 1})).unwrap();
        storage.insert_result("recipe-b", "BTCUSDT", &serde_json::json!({"v": 2})).unwrap();

        let results = BacktestResultStore::list(&storage).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].recipe_name, "recipe-b");
    }

    #[test]
    fn credential_round_trips_through_encryption() {
        let storage = temp_storage();
        storage.save("binance", "my-key", "my-secret").unwrap();
        assert!(storage.has("binance").unwrap());

        let (key, secret) = storage.load("binance").unwrap().unwrap();
        assert_eq!(key, "my-key");
        assert_eq!(secret, "my-secret");
    }

    #[test]
    fn credential_delete_removes_the_row() {
        let storage = temp_storage();
        storage.save("binance", "k", "s").unwrap();
        storage.delete("binance").unwrap();
        assert!(!storage.has("binance").unwrap());
        assert!(storage.load("binance").unwrap().is_none());
    }

    #[test]
    fn missing_credential_returns_none() {
        let storage = temp_storage();
        assert!(storage.load("coinbase").unwrap().is_none());
    }
}
