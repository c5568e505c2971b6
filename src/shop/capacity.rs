//! Shop capacity manager
//!
//! Reservations and the `filled_slots` increment happen under the shop's own
//! lock, so concurrent reservations can never oversell a shop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::sync::LockTable;

use super::types::{NewShop, Reservation, ReservationId, Shop, ShopId, ShopStatus};

/// Tracks shops and their slot reservations
pub struct ShopCapacityManager {
    shops: LockTable<ShopId, Shop>,
    reservations: LockTable<ReservationId, Reservation>,
    clock: Arc<dyn Clock>,
}

impl ShopCapacityManager {
    pub fn new(clock: Arc<dyn Clock>, lock_timeout: Duration) -> Self {
        Self {
            shops: LockTable::new("shop", lock_timeout),
            reservations: LockTable::new("reservation", lock_timeout),
            clock,
        }
    }

    /// Create a shop; `default_profit_bps` applies when the shop has no rate
    pub fn create_shop(&self, new: NewShop, default_profit_bps: u32) -> Result<Shop> {
        let daily_percent_bps = new.daily_percent_bps.unwrap_or(default_profit_bps);
        new.validate(daily_percent_bps)?;

        let shop = Shop {
            id: Uuid::new_v4(),
            name: new.name.trim().to_string(),
            daily_percent_bps,
            duration_days: new.duration_days,
            min_amount: new.min_amount,
            max_amount: new.max_amount,
            total_slots: new.total_slots,
            filled_slots: 0,
            status: ShopStatus::Active,
            created_at: self.clock.now(),
        };

        if !self.shops.insert(shop.id, shop.clone()) {
            return Err(Error::Validation(format!("shop {} already exists", shop.id)));
        }

        info!(
            "Created shop {} ({}): {}%/day for {} days, {} slots",
            shop.name,
            shop.id,
            shop.daily_percent_display(),
            shop.duration_days,
            shop.total_slots
        );
        Ok(shop)
    }

    pub async fn get(&self, shop_id: &ShopId) -> Result<Shop> {
        self.shops.read(shop_id).await
    }

    pub async fn list(&self) -> Result<Vec<Shop>> {
        let mut shops = self.shops.values().await?;
        shops.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(shops)
    }

    /// Administrative status change
    pub async fn set_status(&self, shop_id: &ShopId, status: ShopStatus) -> Result<Shop> {
        let mut shop = self.shops.lock(shop_id).await?;

        if status == ShopStatus::FullyFunded {
            return Err(Error::Validation(
                "fully_funded is set automatically when all slots are taken".to_string(),
            ));
        }
        if shop.status == ShopStatus::Closed && status != ShopStatus::Closed {
            return Err(Error::Validation(format!("shop {} is closed", shop.id)));
        }
        if shop.status == ShopStatus::FullyFunded && status == ShopStatus::Active {
            return Err(Error::Validation(format!(
                "shop {} has no free slots",
                shop.id
            )));
        }

        info!("Shop {} status {} -> {}", shop.id, shop.status, status);
        shop.status = status;
        Ok(shop.clone())
    }

    /// Reserve slots on an active shop
    ///
    /// Returns the reservation together with the shop as it stood right after
    /// the increment.
    pub async fn reserve(&self, shop_id: &ShopId, slots: u32) -> Result<(Reservation, Shop)> {
        if slots == 0 {
            return Err(Error::Validation("must reserve at least one slot".to_string()));
        }

        let mut shop = self.shops.lock(shop_id).await?;

        // A full shop reports capacity, not status, to the losing caller
        if shop.status == ShopStatus::FullyFunded {
            return Err(Error::CapacityExceeded {
                shop: shop.id.to_string(),
                filled: shop.filled_slots,
                total: shop.total_slots,
            });
        }
        if shop.status != ShopStatus::Active {
            return Err(Error::ShopNotActive {
                shop: shop.id.to_string(),
                status: shop.status.to_string(),
            });
        }

        let filled = shop.filled_slots.checked_add(slots).filter(|&f| f <= shop.total_slots);
        let Some(filled) = filled else {
            return Err(Error::CapacityExceeded {
                shop: shop.id.to_string(),
                filled: shop.filled_slots,
                total: shop.total_slots,
            });
        };

        let reservation = Reservation {
            id: Uuid::new_v4(),
            shop_id: shop.id,
            slots,
            previous_status: shop.status,
            released: false,
            created_at: self.clock.now(),
        };

        shop.filled_slots = filled;
        if shop.filled_slots == shop.total_slots {
            shop.status = ShopStatus::FullyFunded;
            info!("Shop {} is now fully funded", shop.id);
        }

        // Fresh id, cannot collide with an existing reservation lock
        self.reservations.insert(reservation.id, reservation.clone());

        debug!(
            "Reserved {} slot(s) on shop {}: {}/{}",
            slots, shop.id, shop.filled_slots, shop.total_slots
        );
        Ok((reservation, shop.clone()))
    }

    /// Undo a reservation; releasing twice is a no-op
    pub async fn release(&self, reservation_id: &ReservationId) -> Result<()> {
        let mut reservation = self.reservations.lock(reservation_id).await?;
        if reservation.released {
            debug!("Reservation {} already released", reservation_id);
            return Ok(());
        }

        let mut shop = self.shops.lock(&reservation.shop_id).await?;
        shop.filled_slots = shop.filled_slots.saturating_sub(reservation.slots);
        if shop.status == ShopStatus::FullyFunded && shop.filled_slots < shop.total_slots {
            shop.status = reservation.previous_status;
        }
        reservation.released = true;

        warn!(
            "Released reservation {} on shop {}: {}/{}",
            reservation.id, shop.id, shop.filled_slots, shop.total_slots
        );
        Ok(())
    }

    pub async fn reservation(&self, reservation_id: &ReservationId) -> Result<Reservation> {
        self.reservations.read(reservation_id).await
    }

    pub async fn export(&self) -> Result<(Vec<Shop>, Vec<Reservation>)> {
        Ok((self.list().await?, self.reservations.values().await?))
    }

    pub fn import(&self, shops: Vec<Shop>, reservations: Vec<Reservation>) -> Result<()> {
        for shop in shops {
            if shop.filled_slots > shop.total_slots {
                return Err(Error::Persistence(format!(
                    "shop {} has {} of {} slots filled",
                    shop.id, shop.filled_slots, shop.total_slots
                )));
            }
            if !self.shops.insert(shop.id, shop.clone()) {
                return Err(Error::Persistence(format!("duplicate shop {}", shop.id)));
            }
        }
        for reservation in reservations {
            if !self.reservations.insert(reservation.id, reservation.clone()) {
                return Err(Error::Persistence(format!(
                    "duplicate reservation {}",
                    reservation.id
                )));
            }
        }
        Ok(())
    }
}
