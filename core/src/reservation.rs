//! The Reservation aggregate and its state machine.
//!
//! ```text
//!         create(expires_at > now)
//!                │
//!                ▼
//!             ACTIVE ──release()──► RELEASED   (terminal)
//!                │
//!              confirm() [fails if expired]
//!                │
//!                ▼
//!            CONFIRMED                          (terminal)
//! ```
//!
//! Expiry never mutates the status. An expired reservation that is still
//! `Active` can be released to reclaim stock but can no longer be confirmed.

use crate::quantity::Quantity;
use crate::types::{OrderId, ReservationId, SkuId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by [`Reservation`] construction and transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// The reservation could not be created as requested.
    #[error("Invalid reservation: {0}")]
    Invalid(String),

    /// The requested transition is not allowed from the current state.
    #[error("Invalid reservation state: {0}")]
    InvalidState(String),
}

/// Persisted lifecycle status of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Holding stock.
    Active,
    /// Stock returned to the available pool.
    Released,
    /// Stock deducted from the total.
    Confirmed,
}

impl ReservationStatus {
    /// Returns `true` for `Released` and `Confirmed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Confirmed)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Released => "RELEASED",
            Self::Confirmed => "CONFIRMED",
        };
        f.write_str(s)
    }
}

/// A time-bounded claim against one SKU's reserved quantity, tied to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ReservationRecord")]
pub struct Reservation {
    id: ReservationId,
    sku_id: SkuId,
    quantity: Quantity,
    order_id: OrderId,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    status: ReservationStatus,
    version: u64,
}

#[derive(Deserialize)]
struct ReservationRecord {
    id: ReservationId,
    sku_id: SkuId,
    quantity: Quantity,
    order_id: OrderId,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    status: ReservationStatus,
    #[serde(default)]
    version: u64,
}

impl TryFrom<ReservationRecord> for Reservation {
    type Error = ReservationError;

    fn try_from(record: ReservationRecord) -> Result<Self, Self::Error> {
        Self::restore(
            record.id,
            record.sku_id,
            record.quantity,
            record.order_id,
            record.expires_at,
            record.created_at,
            record.status,
            record.version,
        )
    }
}

impl Reservation {
    /// Creates an `Active` reservation.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Invalid`] if `quantity` is zero or
    /// `expires_at` is not strictly after `now`.
    pub fn create(
        id: ReservationId,
        sku_id: SkuId,
        quantity: Quantity,
        order_id: OrderId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, ReservationError> {
        if quantity.is_zero() {
            return Err(ReservationError::Invalid(
                "reservation quantity must be greater than zero".to_string(),
            ));
        }
        if expires_at <= now {
            return Err(ReservationError::Invalid(format!(
                "expiry {expires_at} must be after creation time {now}"
            )));
        }
        Ok(Self {
            id,
            sku_id,
            quantity,
            order_id,
            expires_at,
            created_at: now,
            status: ReservationStatus::Active,
            version: 0,
        })
    }

    /// Creates an `Active` reservation expiring `ttl` after `now`.
    ///
    /// # Errors
    ///
    /// Same as [`Reservation::create`]; a non-positive `ttl` is rejected.
    pub fn create_with_ttl(
        id: ReservationId,
        sku_id: SkuId,
        quantity: Quantity,
        order_id: OrderId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, ReservationError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| ReservationError::Invalid(format!("TTL {ttl} is out of range")))?;
        Self::create(id, sku_id, quantity, order_id, expires_at, now)
    }

    /// Rebuilds a reservation from persisted state.
    ///
    /// Expiry relative to the current time is not checked; a stored
    /// reservation may already have lapsed.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Invalid`] if `quantity` is zero or
    /// `expires_at` is not after `created_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ReservationId,
        sku_id: SkuId,
        quantity: Quantity,
        order_id: OrderId,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
        status: ReservationStatus,
        version: u64,
    ) -> Result<Self, ReservationError> {
        if quantity.is_zero() {
            return Err(ReservationError::Invalid(format!(
                "stored reservation {id} has zero quantity"
            )));
        }
        if expires_at <= created_at {
            return Err(ReservationError::Invalid(format!(
                "stored reservation {id} expires at {expires_at}, not after creation at {created_at}"
            )));
        }
        Ok(Self {
            id,
            sku_id,
            quantity,
            order_id,
            expires_at,
            created_at,
            status,
            version,
        })
    }

    /// Reservation id.
    #[must_use]
    pub const fn id(&self) -> &ReservationId {
        &self.id
    }

    /// Reserved SKU.
    #[must_use]
    pub const fn sku_id(&self) -> &SkuId {
        &self.sku_id
    }

    /// Reserved quantity.
    #[must_use]
    pub const fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// Owning order.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// Expiry instant.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Creation instant.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Persisted status. Expiry is not reflected here; see [`Reservation::is_expired`].
    #[must_use]
    pub const fn status(&self) -> ReservationStatus {
        self.status
    }

    /// Optimistic concurrency version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns a copy stamped with a new persisted version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// `now > expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// `Active` and not expired.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && !self.is_expired(now)
    }

    /// `Active → Released`. Allowed even after expiry.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidState`] from a terminal state.
    pub fn release(&mut self) -> Result<(), ReservationError> {
        match self.status {
            ReservationStatus::Active => {
                self.status = ReservationStatus::Released;
                Ok(())
            }
            ReservationStatus::Released => Err(ReservationError::InvalidState(
                "reservation already released".to_string(),
            )),
            ReservationStatus::Confirmed => Err(ReservationError::InvalidState(
                "confirmed reservation cannot be released".to_string(),
            )),
        }
    }

    /// `Active → Confirmed`.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidState`] if the reservation has
    /// expired or is already terminal. Expiry is checked first.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), ReservationError> {
        if self.is_expired(now) {
            return Err(ReservationError::InvalidState(
                "expired reservation cannot be confirmed".to_string(),
            ));
        }
        match self.status {
            ReservationStatus::Active => {
                self.status = ReservationStatus::Confirmed;
                Ok(())
            }
            ReservationStatus::Confirmed => Err(ReservationError::InvalidState(
                "reservation already confirmed".to_string(),
            )),
            ReservationStatus::Released => Err(ReservationError::InvalidState(
                "released reservation cannot be confirmed".to_string(),
            )),
        }
    }
}
