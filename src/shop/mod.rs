//! Shop capacity module
//!
//! Investable shops with a fixed number of slots. A shop can never accept more
//! investments than it has slots, and flips to FullyFunded on the last one.

pub mod capacity;
pub mod types;

pub use capacity::ShopCapacityManager;
pub use types::{NewShop, Reservation, ReservationId, Shop, ShopId, ShopStatus, MAX_DURATION_DAYS};
