pub mod binance;
pub mod chart;
pub mod format;
pub mod live;
pub mod persistence;
pub mod sim;
pub mod store;
pub mod types;
