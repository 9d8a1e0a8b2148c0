//! Start timeout and start delay values.
//!
//! Timeouts cross the adapter boundary as signed milliseconds with two
//! sentinels: [`IMMEDIATE`] and [`INDEFINITE`]. Start delays report
//! [`UNKNOWN`] when the runtime cannot measure them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The action must happen right away or not at all.
pub const IMMEDIATE: i64 = 0;

/// No time bound on the action.
pub const INDEFINITE: i64 = i64::MAX;

/// Unknown start delay or other unknown duration.
pub const UNKNOWN: i64 = -1;

/// A negative start timeout was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("start timeout must be non-negative, got {0} ms")]
pub struct NegativeTimeout(pub i64);

/// Bound on the time between acceptance and start of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum StartTimeout {
    /// Start now if a worker is free, otherwise time out.
    Immediate,
    /// Start within the given duration. A zero duration behaves as
    /// [`StartTimeout::Immediate`].
    Within(Duration),
    /// Wait for a worker without bound.
    #[default]
    Indefinite,
}

impl StartTimeout {
    /// Parse a millisecond value, mapping the sentinels.
    pub fn from_millis(millis: i64) -> Result<Self, NegativeTimeout> {
        match millis {
            IMMEDIATE => Ok(Self::Immediate),
            INDEFINITE => Ok(Self::Indefinite),
            m if m < 0 => Err(NegativeTimeout(m)),
            m => Ok(Self::Within(Duration::from_millis(m as u64))),
        }
    }

    /// Build from a duration. A zero duration is [`StartTimeout::Immediate`].
    pub fn within(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Immediate
        } else {
            Self::Within(duration)
        }
    }

    /// Whether the item must start without waiting.
    pub fn is_immediate(&self) -> bool {
        match self {
            Self::Immediate => true,
            Self::Within(d) => d.is_zero(),
            Self::Indefinite => false,
        }
    }

    /// Millisecond form, using the sentinels for the unbounded cases.
    /// Non-zero bounds below one millisecond round up to 1.
    pub fn as_millis(&self) -> i64 {
        match self {
            Self::Indefinite => INDEFINITE,
            _ if self.is_immediate() => IMMEDIATE,
            Self::Within(d) => i64::try_from(d.as_millis()).unwrap_or(INDEFINITE - 1).max(1),
            Self::Immediate => IMMEDIATE,
        }
    }

    /// The finite bound, if any. `Immediate` is a zero bound.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Immediate => Some(Duration::ZERO),
            Self::Within(d) => Some(*d),
            Self::Indefinite => None,
        }
    }
}

impl TryFrom<i64> for StartTimeout {
    type Error = NegativeTimeout;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_millis(value)
    }
}

impl From<StartTimeout> for i64 {
    fn from(value: StartTimeout) -> Self {
        value.as_millis()
    }
}

impl std::fmt::Display for StartTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Indefinite => write!(f, "indefinite"),
            _ if self.is_immediate() => write!(f, "immediate"),
            Self::Within(d) => write!(f, "{}ms", d.as_millis()),
            Self::Immediate => write!(f, "immediate"),
        }
    }
}

/// Elapsed time between acceptance and start of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartDelay {
    /// Measured delay.
    Known(Duration),
    /// The runtime could not measure the delay.
    Unknown,
}

impl StartDelay {
    /// Read a reported millisecond value; any negative value means unknown.
    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Self::Unknown
        } else {
            Self::Known(Duration::from_millis(millis as u64))
        }
    }

    /// Millisecond form: non-negative, or [`UNKNOWN`].
    pub fn as_millis(&self) -> i64 {
        match self {
            Self::Known(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
            Self::Unknown => UNKNOWN,
        }
    }
}

impl std::fmt::Display for StartDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(d) => write!(f, "{}ms", d.as_millis()),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_map_to_variants() {
        assert_eq!(StartTimeout::from_millis(IMMEDIATE).unwrap(), StartTimeout::Immediate);
        assert_eq!(StartTimeout::from_millis(INDEFINITE).unwrap(), StartTimeout::Indefinite);
        assert_eq!(
            StartTimeout::from_millis(250).unwrap(),
            StartTimeout::Within(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_negative_timeout_is_rejected() {
        assert_eq!(StartTimeout::from_millis(-5), Err(NegativeTimeout(-5)));
        assert_eq!(StartTimeout::from_millis(UNKNOWN), Err(NegativeTimeout(-1)));
    }

    #[test]
    fn test_zero_duration_is_immediate() {
        assert_eq!(StartTimeout::within(Duration::ZERO), StartTimeout::Immediate);
        assert_eq!(StartTimeout::within(Duration::ZERO).as_millis(), IMMEDIATE);
    }

    #[test]
    fn test_zero_bound_behaves_as_immediate() {
        let zero = StartTimeout::Within(Duration::ZERO);
        assert!(zero.is_immediate());
        assert_eq!(zero.as_millis(), IMMEDIATE);
        assert_eq!(zero.to_string(), "immediate");

        let json = serde_json::to_string(&zero).unwrap();
        assert_eq!(serde_json::from_str::<StartTimeout>(&json).unwrap(), StartTimeout::Immediate);

        assert!(!StartTimeout::Within(Duration::from_micros(300)).is_immediate());
        assert_eq!(StartTimeout::Within(Duration::from_micros(300)).as_millis(), 1);
        assert!(!StartTimeout::Indefinite.is_immediate());
    }

    #[test]
    fn test_default_is_indefinite() {
        assert_eq!(StartTimeout::default(), StartTimeout::Indefinite);
        assert_eq!(StartTimeout::default().as_duration(), None);
    }

    #[test]
    fn test_timeout_serializes_as_millis() {
        let json = serde_json::to_string(&StartTimeout::Within(Duration::from_millis(40))).unwrap();
        assert_eq!(json, "40");
        let parsed: StartTimeout = serde_json::from_str("0").unwrap();
        assert_eq!(parsed, StartTimeout::Immediate);
        assert!(serde_json::from_str::<StartTimeout>("-3").is_err());
    }

    #[test]
    fn test_start_delay_never_reports_other_negatives() {
        assert_eq!(StartDelay::from_millis(-42), StartDelay::Unknown);
        assert_eq!(StartDelay::from_millis(-42).as_millis(), UNKNOWN);
        assert_eq!(StartDelay::Known(Duration::from_millis(7)).as_millis(), 7);
    }
}
