use crate::error::AppError;
use crate::market::chart;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Maximum number of samples kept in an asset's rolling chart window.
pub const CHART_MAX_POINTS: usize = 24;

pub const DEFAULT_SIM_TICK_INTERVAL_MS: u64 = 2_000;
pub const MIN_SIM_TICK_INTERVAL_MS: u64 = 100;
pub const MAX_SIM_TICK_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
pub const MAX_RECONNECT_ATTEMPTS_LIMIT: u32 = 20;
pub const MIN_RECONNECT_DELAY_MS: u64 = 500;
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const MIN_CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 60_000;
pub const MIN_PING_INTERVAL_MS: u64 = 5_000;
pub const MAX_PING_INTERVAL_MS: u64 = 120_000;

/// One tracked instrument and its current market fields. Serialized shape
/// matches the persisted dashboard blob (camelCase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: u32,
    pub name: String,
    pub symbol: String,
    pub logo: String,
    pub price: f64,
    pub change1h: f64,
    pub change24h: f64,
    pub change7d: f64,
    pub market_cap: f64,
    pub volume24h: f64,
    pub circulating_supply: f64,
    pub max_supply: Option<f64>,
    pub chart_data: Vec<f64>,
    pub color: String,
}

/// Partial update merged into an asset by `AssetStore::update_one`.
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetUpdate {
    pub price: Option<f64>,
    pub change1h: Option<f64>,
    pub change24h: Option<f64>,
    pub change7d: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume24h: Option<f64>,
    pub chart_data: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Name,
    Symbol,
    Price,
    Change1h,
    Change24h,
    Change7d,
    MarketCap,
    Volume24h,
    CirculatingSupply,
    MaxSupply,
    ChartData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFilter {
    Gainers,
    Losers,
}

/// The whole application state: assets in insertion order plus the active
/// sort and filter. This is exactly what gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    pub assets: Vec<Asset>,
    pub sort_by: Option<SortField>,
    pub sort_direction: SortDirection,
    pub filter: Option<AssetFilter>,
}

impl DashboardState {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self {
            assets,
            sort_by: None,
            sort_direction: SortDirection::Ascending,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Failed,
}

/// Transient live-feed status, published over the status broadcast channel.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatusSnapshot {
    pub state: FeedConnectionState,
    pub last_error: Option<String>,
    pub message_count: u64,
    pub last_message_at_ms: Option<i64>,
    pub reconnect_attempts: u32,
}

impl FeedStatusSnapshot {
    pub fn idle() -> Self {
        Self {
            state: FeedConnectionState::Disconnected,
            last_error: None,
            message_count: 0,
            last_message_at_ms: None,
            reconnect_attempts: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == FeedConnectionState::Connected
    }
}

/// Internal symbol (e.g. "BTC") paired with the exchange market symbol it is
/// streamed under (e.g. "BTCUSDT").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolMapping {
    pub internal: String,
    pub market: String,
}

impl SymbolMapping {
    pub fn new(internal: &str, market: &str) -> Self {
        Self {
            internal: internal.to_string(),
            market: market.to_string(),
        }
    }
}

/// Fixed set of tracked instruments. USDT rides the BUSD pair as a proxy.
pub fn default_symbol_map() -> Vec<SymbolMapping> {
    vec![
        SymbolMapping::new("BTC", "BTCUSDT"),
        SymbolMapping::new("ETH", "ETHUSDT"),
        SymbolMapping::new("USDT", "USDTBUSD"),
        SymbolMapping::new("BNB", "BNBUSDT"),
        SymbolMapping::new("SOL", "SOLUSDT"),
    ]
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveFeedArgs {
    pub symbols: Option<Vec<SymbolMapping>>,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_delay_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub ping_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    pub symbols: Vec<SymbolMapping>,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub ping_interval_ms: u64,
}

impl LiveFeedArgs {
    pub fn normalize(self) -> Result<LiveFeedConfig, AppError> {
        let mut symbols = self.symbols.unwrap_or_else(default_symbol_map);
        if symbols.is_empty() {
            return Err(AppError::InvalidArgument(
                "symbol map must not be empty".to_string(),
            ));
        }
        for mapping in &mut symbols {
            mapping.internal = mapping.internal.trim().to_ascii_uppercase();
            mapping.market = mapping.market.trim().to_ascii_uppercase();
            if mapping.market.is_empty()
                || !mapping.market.chars().all(|ch| ch.is_ascii_alphanumeric())
            {
                return Err(AppError::InvalidArgument(
                    "market symbol must be non-empty alphanumeric ASCII".to_string(),
                ));
            }
            if mapping.internal.is_empty() {
                return Err(AppError::InvalidArgument(
                    "internal symbol must be non-empty".to_string(),
                ));
            }
        }

        let max_reconnect_attempts = self
            .max_reconnect_attempts
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);
        if !(1..=MAX_RECONNECT_ATTEMPTS_LIMIT).contains(&max_reconnect_attempts) {
            return Err(AppError::InvalidArgument(format!(
                "maxReconnectAttempts must be between 1 and {MAX_RECONNECT_ATTEMPTS_LIMIT}"
            )));
        }

        let reconnect_delay_ms = self.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "reconnectDelayMs must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        let connect_timeout_ms = self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
        if !(MIN_CONNECT_TIMEOUT_MS..=MAX_CONNECT_TIMEOUT_MS).contains(&connect_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "connectTimeoutMs must be between {MIN_CONNECT_TIMEOUT_MS} and {MAX_CONNECT_TIMEOUT_MS}"
            )));
        }

        let ping_interval_ms = self.ping_interval_ms.unwrap_or(DEFAULT_PING_INTERVAL_MS);
        if !(MIN_PING_INTERVAL_MS..=MAX_PING_INTERVAL_MS).contains(&ping_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "pingIntervalMs must be between {MIN_PING_INTERVAL_MS} and {MAX_PING_INTERVAL_MS}"
            )));
        }

        Ok(LiveFeedConfig {
            symbols,
            max_reconnect_attempts,
            reconnect_delay_ms,
            connect_timeout_ms,
            ping_interval_ms,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedFeedArgs {
    pub tick_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SimulatedFeedConfig {
    pub tick_interval_ms: u64,
}

impl SimulatedFeedArgs {
    pub fn normalize(self) -> Result<SimulatedFeedConfig, AppError> {
        let tick_interval_ms = self.tick_interval_ms.unwrap_or(DEFAULT_SIM_TICK_INTERVAL_MS);
        if !(MIN_SIM_TICK_INTERVAL_MS..=MAX_SIM_TICK_INTERVAL_MS).contains(&tick_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "tickIntervalMs must be between {MIN_SIM_TICK_INTERVAL_MS} and {MAX_SIM_TICK_INTERVAL_MS}"
            )));
        }
        Ok(SimulatedFeedConfig { tick_interval_ms })
    }
}

/// Envelope of the combined-stream endpoint. Ticker payloads arrive as
/// `{ stream, data }`; the server's pong-equivalent as `{ pong }`.
#[derive(Debug, Deserialize)]
struct StreamFrameWire {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    data: Option<TickerWire>,
    #[serde(default)]
    pong: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TickerWire {
    #[serde(rename = "s")]
    pub market_symbol: String,
    #[serde(rename = "c")]
    pub last_price: String,
    #[serde(rename = "p")]
    pub change24h_abs: String,
    #[serde(rename = "P")]
    pub change24h_pct: String,
    #[serde(rename = "v")]
    pub base_volume: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickerEvent {
    pub market_symbol: String,
    pub last_price: f64,
    pub change24h_abs: f64,
    pub change24h_pct: f64,
    pub base_volume: f64,
}

impl TryFrom<TickerWire> for TickerEvent {
    type Error = AppError;

    fn try_from(value: TickerWire) -> Result<Self, Self::Error> {
        let last_price = value.last_price.parse::<f64>()?;
        let change24h_abs = value.change24h_abs.parse::<f64>()?;
        let change24h_pct = value.change24h_pct.parse::<f64>()?;
        let base_volume = value.base_volume.parse::<f64>()?;

        if !last_price.is_finite() || last_price <= 0.0 {
            return Err(AppError::InvalidArgument(
                "ticker price must be finite and positive".to_string(),
            ));
        }
        if !change24h_abs.is_finite() || !change24h_pct.is_finite() {
            return Err(AppError::InvalidArgument(
                "ticker change values must be finite".to_string(),
            ));
        }
        if !base_volume.is_finite() || base_volume < 0.0 {
            return Err(AppError::InvalidArgument(
                "ticker volume must be finite and non-negative".to_string(),
            ));
        }

        Ok(Self {
            market_symbol: value.market_symbol,
            last_price,
            change24h_abs,
            change24h_pct,
            base_volume,
        })
    }
}

/// A decoded inbound frame from the combined stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Ticker(TickerEvent),
    Pong,
    Ignored,
}

pub fn parse_stream_frame(payload: &mut [u8]) -> Result<StreamFrame, AppError> {
    let wire: StreamFrameWire = simd_json::serde::from_slice(payload)?;

    if wire.pong.is_some() {
        return Ok(StreamFrame::Pong);
    }
    match (wire.stream, wire.data) {
        (Some(_), Some(ticker)) => Ok(StreamFrame::Ticker(ticker.try_into()?)),
        _ => Ok(StreamFrame::Ignored),
    }
}

/// Built-in seed list, used when no persisted state exists.
pub fn seed_assets<R: Rng + ?Sized>(rng: &mut R) -> Vec<Asset> {
    vec![
        Asset {
            id: 1,
            name: "Bitcoin".to_string(),
            symbol: "BTC".to_string(),
            logo: "https://assets.coingecko.com/coins/images/1/large/bitcoin.png".to_string(),
            price: 65_432.10,
            change1h: 0.5,
            change24h: 1.2,
            change7d: -0.8,
            market_cap: 1_258_000_000_000.0,
            volume24h: 32_500_000_000.0,
            circulating_supply: 19_200_000.0,
            max_supply: Some(21_000_000.0),
            chart_data: chart::seed_series(7, rng),
            color: "#F7931A".to_string(),
        },
        Asset {
            id: 2,
            name: "Ethereum".to_string(),
            symbol: "ETH".to_string(),
            logo: "https://assets.coingecko.com/coins/images/279/large/ethereum.png".to_string(),
            price: 3_521.45,
            change1h: -0.2,
            change24h: 2.5,
            change7d: 3.1,
            market_cap: 423_000_000_000.0,
            volume24h: 18_700_000_000.0,
            circulating_supply: 120_000_000.0,
            max_supply: None,
            chart_data: chart::seed_series(7, rng),
            color: "#627EEA".to_string(),
        },
        Asset {
            id: 3,
            name: "Tether".to_string(),
            symbol: "USDT".to_string(),
            logo: "https://assets.coingecko.com/coins/images/325/large/Tether.png".to_string(),
            price: 1.00,
            change1h: 0.01,
            change24h: -0.02,
            change7d: 0.03,
            market_cap: 95_000_000_000.0,
            volume24h: 65_000_000_000.0,
            circulating_supply: 95_000_000_000.0,
            max_supply: None,
            chart_data: chart::seed_series(7, rng),
            color: "#26A17B".to_string(),
        },
        Asset {
            id: 4,
            name: "BNB".to_string(),
            symbol: "BNB".to_string(),
            logo: "https://assets.coingecko.com/coins/images/825/large/bnb-icon2_2x.png"
                .to_string(),
            price: 608.75,
            change1h: 0.8,
            change24h: -1.5,
            change7d: 2.3,
            market_cap: 93_000_000_000.0,
            volume24h: 2_100_000_000.0,
            circulating_supply: 153_000_000.0,
            max_supply: Some(200_000_000.0),
            chart_data: chart::seed_series(7, rng),
            color: "#F3BA2F".to_string(),
        },
        Asset {
            id: 5,
            name: "Solana".to_string(),
            symbol: "SOL".to_string(),
            logo: "https://assets.coingecko.com/coins/images/4128/large/solana.png".to_string(),
            price: 142.30,
            change1h: 1.2,
            change24h: 3.8,
            change7d: -2.1,
            market_cap: 61_000_000_000.0,
            volume24h: 2_800_000_000.0,
            circulating_supply: 429_000_000.0,
            max_supply: None,
            chart_data: chart::seed_series(7, rng),
            color: "#00FFA3".to_string(),
        },
    ]
}

/// Round to two decimals, the display precision both feeds write at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn now_unix_ms() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
