//! Hand-rolled RFC 6455 WebSocket client for public market-data streams. No
//! prebuilt WebSocket crate: the handshake, frame parsing, and masking are
//! implemented directly over `tokio::net::TcpStream` (optionally wrapped in
//! `tokio-rustls` for `wss://`).

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::types::{EngineError, Symbol};

/// Parsed `wss://host:port/path?query` (or `ws://`) stream URL.
struct StreamUrl {
    tls: bool,
    host: String,
    port: u16,
    path: String,
}

impl StreamUrl {
    /// Parses the `wss://host:port/stream?streams=<s1>/<s2>/...` form from
    /// §4.7. A missing port defaults to 443 for `wss` and 80 for `ws`.
    fn parse(url: &str) -> Result<Self, EngineError> {
        let (tls, rest) = if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else {
            return Err(EngineError::WebSocketError(format!(
                "unsupported websocket url scheme: {url}"
            )));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse()
                    .map_err(|_| EngineError::WebSocketError(format!("invalid port in url: {url}")))?,
            ),
            None => (authority.to_string(), if tls { 443 } else { 80 }),
        };

        Ok(Self {
            tls,
            host,
            port,
            path: path.to_string(),
        })
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

const OPCODE_TEXT: u8 = 0x1;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

#[derive(Debug, Clone)]
pub struct TickerUpdate {
    pub symbol: String,
    pub last_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct TradeUpdate {
    pub symbol: String,
    pub trade_id: i64,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: i64,
    pub is_buyer_maker: bool,
}

#[derive(Debug, Clone)]
pub struct KlineUpdate {
    pub symbol: String,
    pub interval: String,
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

#[derive(Debug, Clone)]
pub enum MarketEvent {
    Ticker(TickerUpdate),
    Trade(TradeUpdate),
    Kline(KlineUpdate),
}

#[derive(Deserialize)]
struct Envelope {
    #[allow(dead_code)]
    stream: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData {
    e: String,
    s: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

/// A single outbound text frame, already masked, ready to be written.
fn build_text_frame(payload: &str) -> Vec<u8> {
    let payload = payload.as_bytes();
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(0x80 | OPCODE_TEXT);

    let len = payload.len();
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mut mask_key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask_key);
    frame.extend_from_slice(&mask_key);
    for (i, &b) in payload.iter().enumerate() {
        frame.push(b ^ mask_key[i % 4]);
    }
    frame
}

fn build_control_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(0x80 | opcode);
    frame.push(0x80 | payload.len() as u8);
    let mut mask_key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask_key);
    frame.extend_from_slice(&mask_key);
    for (i, &b) in payload.iter().enumerate() {
        frame.push(b ^ mask_key[i % 4]);
    }
    frame
}

struct Frame {
    opcode: u8,
    payload: Vec<u8>,
}

async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, EngineError> {
    let mut header = [0u8; 2];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| EngineError::WebSocketError(format!("read header failed: {e}")))?;

    let opcode = header[0] & 0x0F;
    let masked = header[1] & 0x80 != 0;
    let mut len = (header[1] & 0x7F) as u64;

    if len == 126 {
        let mut ext = [0u8; 2];
        reader
            .read_exact(&mut ext)
            .await
            .map_err(|e| EngineError::WebSocketError(format!("read ext len failed: {e}")))?;
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        reader
            .read_exact(&mut ext)
            .await
            .map_err(|e| EngineError::WebSocketError(format!("read ext len failed: {e}")))?;
        len = u64::from_be_bytes(ext);
    }

    let mask_key = if masked {
        let mut key = [0u8; 4];
        reader
            .read_exact(&mut key)
            .await
            .map_err(|e| EngineError::WebSocketError(format!("read mask key failed: {e}")))?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| EngineError::WebSocketError(format!("read payload failed: {e}")))?;

    if let Some(key) = mask_key {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }

    Ok(Frame { opcode, payload })
}

fn generate_sec_websocket_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

async fn perform_handshake(
    stream: &mut (impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin),
    host: &str,
    path: &str,
) -> Result<(), EngineError> {
    let key = generate_sec_websocket_key();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| EngineError::WebSocketError(format!("handshake write failed: {e}")))?;

    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream
            .read_exact(&mut byte)
            .await
            .map_err(|e| EngineError::WebSocketError(format!("handshake read failed: {e}")))?;
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    let response = String::from_utf8_lossy(&buf);
    if !response.starts_with("HTTP/1.1 101") {
        return Err(EngineError::WebSocketError(format!(
            "handshake rejected: {}",
            response.lines().next().unwrap_or_default()
        )));
    }
    Ok(())
}

type ListenerMap<T> = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<T>>>>;

/// Unifies a plain `TcpStream` and a TLS-wrapped one behind one object-safe
/// type so the rest of the client doesn't care which transport a given
/// connection used.
trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

type DynReadHalf = tokio::io::ReadHalf<Box<dyn Stream>>;
type DynWriteHalf = tokio::io::WriteHalf<Box<dyn Stream>>;

/// Maintains a WebSocket connection to a public stream endpoint and
/// dispatches decoded events to per-symbol listeners. The reader runs as a
/// background task; it never touches listener state directly -- it posts
/// decoded events onto an unbounded channel the consumer drains on its own
/// task.
pub struct LiveMarketClient {
    writer: Arc<Mutex<DynWriteHalf>>,
    connected: Arc<std::sync::atomic::AtomicBool>,
    events_tx: mpsc::UnboundedSender<MarketEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<MarketEvent>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl LiveMarketClient {
    /// Parses a `wss://host:port/stream?streams=...` (or `ws://`) URL per
    /// §4.7, connects over TLS when the scheme is `wss`, and performs the
    /// RFC-6455 handshake.
    pub async fn connect_url(url: &str) -> Result<Self, EngineError> {
        let parsed = StreamUrl::parse(url)?;
        let tcp = TcpStream::connect((parsed.host.as_str(), parsed.port))
            .await
            .map_err(|e| EngineError::WebSocketError(format!("connect failed: {e}")))?;

        let boxed: Box<dyn Stream> = if parsed.tls {
            let connector = tls_connector();
            let server_name = ServerName::try_from(parsed.host.clone())
                .map_err(|e| EngineError::WebSocketError(format!("invalid TLS server name: {e}")))?;
            let tls_stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| EngineError::WebSocketError(format!("TLS handshake failed: {e}")))?;
            Box::new(tls_stream)
        } else {
            Box::new(tcp)
        };

        Self::connect_stream(boxed, &parsed.host, &parsed.path).await
    }

    /// Connects over plain TCP to `host:port` and performs the RFC-6455
    /// handshake against `path`. Prefer [`LiveMarketClient::connect_url`] for
    /// a `wss://`/`ws://` URL; this entry point is for callers that already
    /// have a resolved host/port (e.g. tests against a local fixture server).
    pub async fn connect(host: &str, port: u16, path: &str) -> Result<Self, EngineError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| EngineError::WebSocketError(format!("connect failed: {e}")))?;
        let boxed: Box<dyn Stream> = Box::new(tcp);
        Self::connect_stream(boxed, host, path).await
    }

    async fn connect_stream(mut stream: Box<dyn Stream>, host: &str, path: &str) -> Result<Self, EngineError> {
        perform_handshake(&mut stream, host, path).await?;

        let (read_half, write_half) = tokio::io::split(stream);
        let writer = Arc::new(Mutex::new(write_half));
        let connected = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(Self::reader_loop(
            read_half,
            writer.clone(),
            connected.clone(),
            events_tx.clone(),
        ));

        Ok(Self {
            writer,
            connected,
            events_tx,
            events_rx: Some(events_rx),
            reader_task: Some(reader_task),
        })
    }

    /// Takes ownership of the event receiver; callers drain it on their own
    /// task. Returns `None` on a second call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<MarketEvent>> {
        self.events_rx.take()
    }

    async fn reader_loop(
        read_half: DynReadHalf,
        writer: Arc<Mutex<DynWriteHalf>>,
        connected: Arc<std::sync::atomic::AtomicBool>,
        events_tx: mpsc::UnboundedSender<MarketEvent>,
    ) {
        let mut reader = BufReader::new(read_half);
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, "websocket reader terminating");
                    connected.store(false, std::sync::atomic::Ordering::SeqCst);
                    return;
                }
            };

            match frame.opcode {
                OPCODE_TEXT => {
                    if let Ok(text) = String::from_utf8(frame.payload) {
                        if let Some(event) = decode_envelope(&text) {
                            let _ = events_tx.send(event);
                        }
                    }
                }
                OPCODE_PING => {
                    let pong = build_control_frame(OPCODE_PONG, &frame.payload);
                    let mut w = writer.lock().await;
                    let _ = w.write_all(&pong).await;
                }
                OPCODE_CLOSE => {
                    connected.store(false, std::sync::atomic::Ordering::SeqCst);
                    return;
                }
                _ => {}
            }
        }
    }

    pub async fn send_text(&self, payload: &str) -> Result<(), EngineError> {
        let frame = build_text_frame(payload);
        let mut w = self.writer.lock().await;
        w.write_all(&frame)
            .await
            .map_err(|e| EngineError::WebSocketError(format!("send failed: {e}")))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Idempotent: a second call is a no-op.
    pub async fn disconnect(&mut self) {
        if !self.connected.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let close_frame = build_control_frame(OPCODE_CLOSE, &[]);
        let mut w = self.writer.lock().await;
        let _ = w.write_all(&close_frame).await;
        drop(w);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Decodes one `{stream, data: {e, ...}}` envelope into a `MarketEvent`.
/// Returns `None` for an unrecognized or malformed envelope.
fn decode_envelope(text: &str) -> Option<MarketEvent> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    let symbol = envelope.data.s.clone()?;

    match envelope.data.e.as_str() {
        "24hrTicker" => {
            let r = &envelope.data.rest;
            Some(MarketEvent::Ticker(TickerUpdate {
                symbol,
                last_price: parse_f64(r, "c"),
                price_change: parse_f64(r, "p"),
                price_change_percent: parse_f64(r, "P"),
                high_price: parse_f64(r, "h"),
                low_price: parse_f64(r, "l"),
                volume: parse_f64(r, "v"),
                quote_volume: parse_f64(r, "q"),
                timestamp: r["E"].as_i64().unwrap_or(0),
            }))
        }
        "trade" => {
            let r = &envelope.data.rest;
            Some(MarketEvent::Trade(TradeUpdate {
                symbol,
                trade_id: r["t"].as_i64().unwrap_or(0),
                price: parse_f64(r, "p"),
                quantity: parse_f64(r, "q"),
                timestamp: r["T"].as_i64().unwrap_or(0),
                is_buyer_maker: r["m"].as_bool().unwrap_or(false),
            }))
        }
        "kline" => {
            let r = &envelope.data.rest;
            let k = &r["k"];
            Some(MarketEvent::Kline(KlineUpdate {
                symbol,
                interval: k["i"].as_str().unwrap_or_default().to_string(),
                open_time: k["t"].as_i64().unwrap_or(0),
                close_time: k["T"].as_i64().unwrap_or(0),
                open: parse_f64(k, "o"),
                high: parse_f64(k, "h"),
                low: parse_f64(k, "l"),
                close: parse_f64(k, "c"),
                volume: parse_f64(k, "v"),
                is_closed: k["x"].as_bool().unwrap_or(false),
            }))
        }
        _ => None,
    }
}

fn parse_f64(value: &serde_json::Value, key: &str) -> f64 {
    value[key]
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| value[key].as_f64())
        .unwrap_or(0.0)
}

/// Per-symbol (case-insensitive) and per-interval listener dispatch, built
/// on top of the decoded `MarketEvent` stream. Owned by the consumer
/// context; never touched from the reader task.
pub struct ListenerRegistry {
    ticker: ListenerMap<TickerUpdate>,
    trade: ListenerMap<TradeUpdate>,
    kline: ListenerMap<KlineUpdate>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self {
            ticker: Arc::new(Mutex::new(HashMap::new())),
            trade: Arc::new(Mutex::new(HashMap::new())),
            kline: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl ListenerRegistry {
    pub async fn subscribe_trade(&self, symbol: &Symbol) -> mpsc::UnboundedReceiver<TradeUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.trade.lock().await.insert(symbol.to_lowercase(), tx);
        rx
    }

    pub async fn subscribe_ticker(&self, symbol: &Symbol) -> mpsc::UnboundedReceiver<TickerUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.ticker.lock().await.insert(symbol.to_lowercase(), tx);
        rx
    }

    pub async fn subscribe_kline(&self, symbol: &Symbol, interval: &str) -> mpsc::UnboundedReceiver<KlineUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.kline
            .lock()
            .await
            .insert(format!("{}@{}", symbol.to_lowercase(), interval), tx);
        rx
    }

    /// Removes a listener. Does NOT by itself stop the upstream stream; a
    /// full resubscription (reconnect) is required to change the server-side
    /// subscription set.
    pub async fn unsubscribe_trade(&self, symbol: &Symbol) {
        self.trade.lock().await.remove(&symbol.to_lowercase());
    }

    pub async fn dispatch(&self, event: MarketEvent) {
        match event {
            MarketEvent::Ticker(t) => {
                let key = t.symbol.to_lowercase();
                if let Some(tx) = self.ticker.lock().await.get(&key) {
                    let _ = tx.send(t);
                }
            }
            MarketEvent::Trade(t) => {
                let key = t.symbol.to_lowercase();
                if let Some(tx) = self.trade.lock().await.get(&key) {
                    let _ = tx.send(t);
                }
            }
            MarketEvent::Kline(k) => {
                let key = format!("{}@{}", k.symbol.to_lowercase(), k.interval);
                if let Some(tx) = self.kline.lock().await.get(&key) {
                    let _ = tx.send(k);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_trade_envelope() {
        let msg = r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","t":123,"p":"50000.00","q":"0.01","T":1,"m":false}}"#;
        match decode_envelope(msg) {
            Some(MarketEvent::Trade(t)) => {
                assert_eq!(t.symbol, "BTCUSDT");
                assert_eq!(t.price, 50000.00);
                assert_eq!(t.quantity, 0.01);
                assert!(!t.is_buyer_maker);
            }
            other => panic!("expected a trade event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn listener_registered_for_one_symbol_does_not_see_another_symbols_trade() {
        let registry = ListenerRegistry::default();
        let mut btc_rx = registry.subscribe_trade(&Symbol::new("BTCUSDT")).await;
        let _eth_rx = registry.subscribe_trade(&Symbol::new("ETHUSDT")).await;

        let msg = r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","t":123,"p":"50000.00","q":"0.01","T":1,"m":false}}"#;
        let event = decode_envelope(msg).unwrap();
        registry.dispatch(event).await;

        let received = btc_rx.try_recv().unwrap();
        assert_eq!(received.price, 50000.00);
    }

    #[test]
    fn build_text_frame_masks_the_payload() {
        let frame = build_text_frame("hello");
        assert_eq!(frame[0], 0x80 | OPCODE_TEXT);
        assert_eq!(frame[1] & 0x80, 0x80);
    }

    #[test]
    fn stream_url_parses_wss_with_explicit_port_and_path() {
        let parsed = StreamUrl::parse("wss://stream.binance.com:9443/stream?streams=btcusdt@trade").unwrap();
        assert!(parsed.tls);
        assert_eq!(parsed.host, "stream.binance.com");
        assert_eq!(parsed.port, 9443);
        assert_eq!(parsed.path, "/stream?streams=btcusdt@trade");
    }

    #[test]
    fn stream_url_defaults_port_by_scheme() {
        let wss = StreamUrl::parse("wss://stream.binance.com/stream").unwrap();
        assert_eq!(wss.port, 443);

        let ws = StreamUrl::parse("ws://localhost/stream").unwrap();
        assert!(!ws.tls);
        assert_eq!(ws.port, 80);
        assert_eq!(ws.path, "/stream");
    }

    #[test]
    fn stream_url_rejects_unsupported_scheme() {
        assert!(StreamUrl::parse("http://stream.binance.com/stream").is_err());
    }
}
