use crate::error::AppError;
use crate::market::types::SymbolMapping;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

const BINANCE_STREAM_BASE_URL: &str = "wss://stream.binance.com:9443/stream";

pub type BinanceWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Combined ticker-stream endpoint for the whole symbol set, e.g.
/// `wss://stream.binance.com:9443/stream?streams=btcusdt@ticker/ethusdt@ticker`.
pub fn combined_stream_endpoint(symbols: &[SymbolMapping]) -> String {
    let streams = symbols
        .iter()
        .map(|mapping| format!("{}@ticker", mapping.market.to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join("/");
    format!("{BINANCE_STREAM_BASE_URL}?streams={streams}")
}

/// Maps an exchange market symbol back to the internal symbol it is tracked
/// under.
pub fn internal_symbol<'a>(symbols: &'a [SymbolMapping], market_symbol: &str) -> Option<&'a str> {
    symbols
        .iter()
        .find(|mapping| mapping.market == market_symbol)
        .map(|mapping| mapping.internal.as_str())
}

pub async fn connect_ticker_stream(
    symbols: &[SymbolMapping],
) -> Result<BinanceWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20),
        max_frame_size: Some(16 << 20),
        ..Default::default()
    };

    let request = combined_stream_endpoint(symbols);
    let (stream, _) = connect_async_with_config(request, Some(ws_config), true).await?;
    Ok(stream)
}
