//! Grandaviator domain types.
//!
//! Defines the tenant settings, flight, bet, leaderboard and event payloads shared by the
//! execution layer and the service. Every type serializes with camelCase field names, which is
//! the shape stored in the round store and returned to API callers.

pub mod api;
mod bet;
mod events;
mod flight;
mod settings;

pub use bet::*;
pub use events::*;
pub use flight::*;
pub use settings::*;


/// Current wall-clock time as Unix seconds.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Render a multiplier the way it is shown to players (`1.23x`).
pub fn display_multiplier(multiplier: f64) -> String {
    format!("{multiplier:.2}x")
}
