//! Headless runtime for a live cryptocurrency price dashboard: an in-memory
//! asset store with derived views, a simulated random-walk feed, a live
//! exchange WebSocket feed with bounded reconnect, and throttled SQLite
//! persistence of the whole dashboard state.

pub mod db;
pub mod error;
pub mod market;
pub mod state;

pub use error::AppError;
pub use state::App;
