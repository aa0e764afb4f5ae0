//! Market data primitives: bars, timeframes, and atomic-unit
//! conversion at the execution boundary.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Atomic units per whole quote token (6-decimal mint).
pub const QUOTE_ATOMIC_SCALE: u64 = 1_000_000;

/// Atomic units per whole base token (9-decimal mint).
pub const BASE_ATOMIC_SCALE: u64 = 1_000_000_000;

/// Market data errors.
#[derive(Debug, Error)]
pub enum MarketError {
    /// Unrecognized timeframe literal.
    #[error("Unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),
    /// Amount cannot be represented as a u64 atomic quantity.
    #[error("Amount not representable in atomic units: {0}")]
    AmountNotRepresentable(Decimal),
}

/// Candle timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    /// One minute.
    M1,
    /// Five minutes.
    M5,
    /// Fifteen minutes.
    M15,
    /// One hour.
    H1,
    /// Four hours.
    H4,
    /// One day.
    D1,
}

impl Timeframe {
    /// Bar duration in seconds.
    #[must_use]
    pub const fn duration_secs(self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }

    /// Canonical literal, e.g. `4h`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Close time of the most recently fully-closed bar at `now`.
    ///
    /// Bars are aligned to the Unix epoch; the forming bar is never
    /// referenced, so a tick exactly on a boundary yields that
    /// boundary itself.
    #[must_use]
    pub fn last_closed_bar_close(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let duration = self.duration_secs();
        let aligned = now.timestamp().div_euclid(duration) * duration;
        Utc.timestamp_opt(aligned, 0).single().unwrap_or(now)
    }
}

impl std::str::FromStr for Timeframe {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(MarketError::UnsupportedTimeframe(other.to_string())),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = MarketError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One closed OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    /// Close time of the bar.
    pub close_time: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Base volume.
    pub volume: Decimal,
}

/// UTC `[start, end)` day range containing `now`, for daily caps.
#[must_use]
pub fn utc_day_range(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = 86_400;
    let start = now.timestamp().div_euclid(day) * day;
    let start = Utc.timestamp_opt(start, 0).single().unwrap_or(now);
    (start, start + chrono::Duration::seconds(day))
}

/// Convert a whole quote amount to 6-decimal atomic units, truncating
/// toward zero. Truncation over rounding: overspend must never come
/// from a conversion.
pub fn quote_to_atomic(amount: Decimal) -> Result<u64, MarketError> {
    to_atomic(amount, QUOTE_ATOMIC_SCALE)
}

/// Convert a whole base amount to 9-decimal atomic units, truncating
/// toward zero.
pub fn base_to_atomic(amount: Decimal) -> Result<u64, MarketError> {
    to_atomic(amount, BASE_ATOMIC_SCALE)
}

/// Convert 6-decimal quote atomic units back to a whole amount.
#[must_use]
pub fn atomic_to_quote(atomic: u64) -> Decimal {
    Decimal::from(atomic) / Decimal::from(QUOTE_ATOMIC_SCALE)
}

/// Convert 9-decimal base atomic units back to a whole amount.
#[must_use]
pub fn atomic_to_base(atomic: u64) -> Decimal {
    Decimal::from(atomic) / Decimal::from(BASE_ATOMIC_SCALE)
}

fn to_atomic(amount: Decimal, scale: u64) -> Result<u64, MarketError> {
    if amount.is_sign_negative() {
        return Err(MarketError::AmountNotRepresentable(amount));
    }
    (amount * Decimal::from(scale))
        .trunc()
        .to_u64()
        .ok_or(MarketError::AmountNotRepresentable(amount))
}
