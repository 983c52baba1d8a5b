//! Candle timeframes such as `1m`, `4h` or `1d`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeframeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeframeUnit {
    fn suffix(self) -> char {
        match self {
            Self::Second => 's',
            Self::Minute => 'm',
            Self::Hour => 'h',
            Self::Day => 'd',
            Self::Week => 'w',
            Self::Month => 'M',
            Self::Year => 'y',
        }
    }

    fn unit_ms(self) -> i64 {
        match self {
            Self::Second => SECOND_MS,
            Self::Minute => MINUTE_MS,
            Self::Hour => HOUR_MS,
            Self::Day => DAY_MS,
            Self::Week => 7 * DAY_MS,
            Self::Month => 30 * DAY_MS,
            Self::Year => 365 * DAY_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timeframe {
    pub amount: u32,
    pub unit: TimeframeUnit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeframeError {
    #[error("invalid timeframe '{0}': expected <amount><unit> with unit in s,m,h,d,w,M,y")]
    Invalid(String),
}

impl Timeframe {
    pub const fn new(amount: u32, unit: TimeframeUnit) -> Self {
        Self { amount, unit }
    }

    pub fn parse(input: &str) -> Result<Self, TimeframeError> {
        let text = input.trim();
        let invalid = || TimeframeError::Invalid(input.to_string());

        let suffix = text.chars().last().ok_or_else(invalid)?;
        let unit = match suffix {
            's' => TimeframeUnit::Second,
            'm' => TimeframeUnit::Minute,
            'h' => TimeframeUnit::Hour,
            'd' => TimeframeUnit::Day,
            'w' => TimeframeUnit::Week,
            'M' => TimeframeUnit::Month,
            'y' => TimeframeUnit::Year,
            _ => return Err(invalid()),
        };

        let amount: u32 = text[..text.len() - suffix.len_utf8()]
            .parse()
            .map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }

        Ok(Self { amount, unit })
    }

    /// Length of one candle in milliseconds.
    pub fn duration_ms(self) -> i64 {
        i64::from(self.amount) * self.unit.unit_ms()
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::new(1, TimeframeUnit::Hour)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

pub fn timeframe_duration_ms(timeframe: &str) -> Result<i64, TimeframeError> {
    Timeframe::parse(timeframe).map(Timeframe::duration_ms)
}
