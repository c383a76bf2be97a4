//! # Adaptive Schedule
//!
//! Decides whether an entity is due for a refresh on the current poller tick.
//! The further an entity's last synchronization lies in the past, the wider
//! the effective polling interval becomes, following an ordered tier table.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Default tier table: hourly for a day, widening to every ten days past two months.
pub const DEFAULT_TIERS: &str = "1d:1h,3d:3h,6d:12h,18d:24h,33d:48h,60d:6d,90d:10d";

/// A single (elapsed-limit, check-frequency) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTier {
    /// Tier applies while the elapsed time is strictly below this limit.
    pub elapsed_limit: Duration,
    /// Poll interval used while this tier applies.
    pub check_frequency: Duration,
}

impl ScheduleTier {
    pub fn new(elapsed_limit: Duration, check_frequency: Duration) -> Self {
        Self {
            elapsed_limit,
            check_frequency,
        }
    }
}

/// Errors produced while building a schedule.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule requires at least one tier")]
    NoTiers,
    #[error("base frequency must be positive")]
    NonPositiveBaseFrequency,
    #[error("tier {index} has a non-positive check frequency")]
    NonPositiveFrequency { index: usize },
    #[error("tier {index} limit is not greater than the previous tier limit")]
    UnorderedTiers { index: usize },
    #[error("invalid tier specification '{value}'")]
    InvalidTier { value: String },
    #[error("invalid duration '{value}'; expected a number followed by s, m, h or d")]
    InvalidDuration { value: String },
}

/// Tiered polling schedule simulating a poller that ticks every `base_frequency`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveSchedule {
    base_frequency: Duration,
    tiers: Vec<ScheduleTier>,
}

impl AdaptiveSchedule {
    /// Build a schedule, validating tier ordering and frequencies.
    pub fn new(base_frequency: Duration, tiers: Vec<ScheduleTier>) -> Result<Self, ScheduleError> {
        if base_frequency <= Duration::zero() {
            return Err(ScheduleError::NonPositiveBaseFrequency);
        }
        if tiers.is_empty() {
            return Err(ScheduleError::NoTiers);
        }
        for (index, tier) in tiers.iter().enumerate() {
            if tier.check_frequency <= Duration::zero() {
                return Err(ScheduleError::NonPositiveFrequency { index });
            }
            if index > 0 && tier.elapsed_limit <= tiers[index - 1].elapsed_limit {
                return Err(ScheduleError::UnorderedTiers { index });
            }
        }

        Ok(Self {
            base_frequency,
            tiers,
        })
    }

    /// Schedule using [`DEFAULT_TIERS`].
    pub fn with_default_tiers(base_frequency: Duration) -> Result<Self, ScheduleError> {
        Self::new(base_frequency, parse_tiers(DEFAULT_TIERS)?)
    }

    pub fn base_frequency(&self) -> Duration {
        self.base_frequency
    }

    /// Whether a refresh is due on the tick happening now.
    pub fn due_now(&self, last_update: DateTime<Utc>) -> bool {
        self.due_at(last_update, Utc::now())
    }

    /// Whether a refresh is due on the tick happening at `now`.
    pub fn due_at(&self, last_update: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let elapsed = (now - last_update).num_milliseconds();
        let call_frequency = self.call_frequency_ms(elapsed);
        let remainder = elapsed.rem_euclid(call_frequency);

        remainder < self.base_frequency.num_milliseconds()
    }

    fn call_frequency_ms(&self, elapsed_ms: i64) -> i64 {
        self.tiers
            .iter()
            .find(|tier| tier.elapsed_limit.num_milliseconds() > elapsed_ms)
            .or_else(|| self.tiers.last())
            .map(|tier| tier.check_frequency.num_milliseconds())
            .unwrap_or_else(|| self.base_frequency.num_milliseconds())
    }
}

/// Parse a tier table such as `1d:1h,3d:3h`.
pub fn parse_tiers(spec: &str) -> Result<Vec<ScheduleTier>, ScheduleError> {
    spec.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (limit, frequency) =
                part.split_once(':')
                    .ok_or_else(|| ScheduleError::InvalidTier {
                        value: part.to_string(),
                    })?;
            Ok(ScheduleTier::new(
                parse_duration(limit)?,
                parse_duration(frequency)?,
            ))
        })
        .collect()
}

/// Parse a compact duration (`90s`, `15m`, `12h`, `10d`).
pub fn parse_duration(value: &str) -> Result<Duration, ScheduleError> {
    let value = value.trim();
    let invalid = || ScheduleError::InvalidDuration {
        value: value.to_string(),
    };

    let split_at = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (amount, unit) = value.split_at(split_at);
    let amount: i64 = amount.parse().map_err(|_| invalid())?;

    let duration = match unit {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        _ => None,
    };
    duration.ok_or_else(invalid)
}
