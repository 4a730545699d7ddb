//! Fare estimation: static per-class rate tables, the quick estimate used by
//! booking and settlement, and the full quote breakdown with an optional
//! surge multiplier.
//!
//! Formula: `fare = base_fare[class] + distance_km * per_km_rate[class]`,
//! rounded to 2 decimals. Quotes are cached for a short validity window.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::error::EngineError;
use crate::geo::{distance_km, Coordinate};

/// Average in-trip speed used to estimate the time component of a quote (km/h).
const AVG_TRIP_SPEED_KMH: f64 = 30.0;

/// Quotes cached per pickup/dropoff/class tuple.
const QUOTE_CACHE_SIZE: usize = 1_000;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VehicleClass {
    Sedan,
    Suv,
    Electric,
    Hatchback,
    Coupe,
    Convertible,
    Wagon,
    Pickup,
    Van,
    Motorcycle,
}

/// Static pricing for one vehicle class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateCard {
    pub base_fare: f64,
    pub per_km_rate: f64,
    pub per_minute_rate: f64,
}

/// Rate table keyed by vehicle class, validated for completeness at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FareConfig {
    pub rates: HashMap<VehicleClass, RateCard>,
    /// Platform share of the final fare on completion.
    pub commission_rate: f64,
    pub tax_rate: f64,
}

impl Default for FareConfig {
    fn default() -> Self {
        let rates = HashMap::from([
            (VehicleClass::Sedan, RateCard { base_fare: 2.50, per_km_rate: 1.50, per_minute_rate: 0.25 }),
            (VehicleClass::Suv, RateCard { base_fare: 3.50, per_km_rate: 2.00, per_minute_rate: 0.35 }),
            (VehicleClass::Electric, RateCard { base_fare: 3.00, per_km_rate: 1.75, per_minute_rate: 0.30 }),
            (VehicleClass::Hatchback, RateCard { base_fare: 2.20, per_km_rate: 1.30, per_minute_rate: 0.22 }),
            (VehicleClass::Coupe, RateCard { base_fare: 4.00, per_km_rate: 2.25, per_minute_rate: 0.40 }),
            (VehicleClass::Convertible, RateCard { base_fare: 5.00, per_km_rate: 2.75, per_minute_rate: 0.50 }),
            (VehicleClass::Wagon, RateCard { base_fare: 2.80, per_km_rate: 1.60, per_minute_rate: 0.28 }),
            (VehicleClass::Pickup, RateCard { base_fare: 3.20, per_km_rate: 1.90, per_minute_rate: 0.32 }),
            (VehicleClass::Van, RateCard { base_fare: 3.80, per_km_rate: 2.10, per_minute_rate: 0.38 }),
            (VehicleClass::Motorcycle, RateCard { base_fare: 1.50, per_km_rate: 0.90, per_minute_rate: 0.15 }),
        ]);
        Self {
            rates,
            commission_rate: 0.20,
            tax_rate: 0.0,
        }
    }
}

impl FareConfig {
    /// Reject incomplete or nonsensical rate tables before the estimator is built.
    pub fn validate(&self) -> Result<(), EngineError> {
        for class in VehicleClass::iter() {
            let card = self.rates.get(&class).ok_or_else(|| {
                EngineError::Validation(format!("missing rate card for vehicle class {class}"))
            })?;
            if card.base_fare < 0.0 || card.per_km_rate < 0.0 || card.per_minute_rate < 0.0 {
                return Err(EngineError::Validation(format!(
                    "negative rate for vehicle class {class}"
                )));
            }
        }
        if !(0.0..1.0).contains(&self.commission_rate) {
            return Err(EngineError::Validation(format!(
                "commission rate {} outside [0, 1)",
                self.commission_rate
            )));
        }
        if self.tax_rate < 0.0 {
            return Err(EngineError::Validation("negative tax rate".into()));
        }
        Ok(())
    }

    fn rate(&self, class: VehicleClass) -> Result<RateCard, EngineError> {
        self.rates.get(&class).copied().ok_or_else(|| {
            EngineError::Validation(format!("missing rate card for vehicle class {class}"))
        })
    }
}

/// Full per-component quote. Ephemeral; cached only for a short validity window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FareQuote {
    pub distance_km: f64,
    pub base_fare: f64,
    pub distance_fare: f64,
    pub time_fare: f64,
    pub surge_multiplier: f64,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

type QuoteKey = (i64, i64, i64, i64, VehicleClass, u32);

pub struct FareEstimator {
    config: FareConfig,
    quote_validity: Duration,
    quote_cache: Mutex<LruCache<QuoteKey, (FareQuote, Instant)>>,
}

impl FareEstimator {
    pub fn new(config: FareConfig, quote_validity: Duration) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            quote_validity,
            quote_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUOTE_CACHE_SIZE).expect("cache size must be non-zero"),
            )),
        })
    }

    pub fn commission_rate(&self) -> f64 {
        self.config.commission_rate
    }

    /// Quick estimate: base fare plus the distance component, 2-decimal rounded.
    pub fn estimate(&self, distance_km: f64, class: VehicleClass) -> Result<f64, EngineError> {
        if !distance_km.is_finite() || distance_km < 0.0 {
            return Err(EngineError::Validation(format!(
                "invalid trip distance {distance_km}"
            )));
        }
        let card = self.config.rate(class)?;
        Ok(round2(card.base_fare + distance_km * card.per_km_rate))
    }

    /// Full quote breakdown for a pickup/dropoff/class tuple.
    ///
    /// The surge multiplier scales the subtotal only; the quick `estimate`
    /// path never applies surge.
    pub fn quote(
        &self,
        pickup: Coordinate,
        dropoff: Coordinate,
        class: VehicleClass,
        surge_multiplier: f64,
    ) -> Result<FareQuote, EngineError> {
        if !surge_multiplier.is_finite() || surge_multiplier < 1.0 {
            return Err(EngineError::Validation(format!(
                "surge multiplier {surge_multiplier} must be >= 1"
            )));
        }

        let key = quote_key(pickup, dropoff, class, surge_multiplier);
        if let Ok(mut cache) = self.quote_cache.lock() {
            if let Some((quote, issued_at)) = cache.get(&key) {
                if issued_at.elapsed() < self.quote_validity {
                    return Ok(*quote);
                }
            }
        }

        let card = self.config.rate(class)?;
        let trip_km = distance_km(pickup, dropoff);
        let trip_minutes = trip_km / AVG_TRIP_SPEED_KMH * 60.0;

        let base_fare = round2(card.base_fare);
        let distance_fare = round2(trip_km * card.per_km_rate);
        let time_fare = round2(trip_minutes * card.per_minute_rate);
        let subtotal = round2((base_fare + distance_fare + time_fare) * surge_multiplier);
        let tax = round2(subtotal * self.config.tax_rate);
        let quote = FareQuote {
            distance_km: trip_km,
            base_fare,
            distance_fare,
            time_fare,
            surge_multiplier,
            subtotal,
            tax,
            total: round2(subtotal + tax),
        };

        if let Ok(mut cache) = self.quote_cache.lock() {
            cache.put(key, (quote, Instant::now()));
        }
        Ok(quote)
    }
}

/// Cache key from microdegree-quantized endpoints and a centi-quantized surge.
fn quote_key(
    pickup: Coordinate,
    dropoff: Coordinate,
    class: VehicleClass,
    surge: f64,
) -> QuoteKey {
    (
        (pickup.lat * 1e6) as i64,
        (pickup.lng * 1e6) as i64,
        (dropoff.lat * 1e6) as i64,
        (dropoff.lng * 1e6) as i64,
        class,
        (surge * 100.0) as u32,
    )
}
