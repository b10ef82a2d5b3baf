/// Volume time-to-live.
///
/// Minutes-or-larger durations encoded as a (count, unit) pair. The zero
/// value means "no TTL" and formats as the empty string.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MasterError, MasterResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TtlUnit {
    #[default]
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TtlUnit {
    fn minutes(self) -> u64 {
        match self {
            TtlUnit::Minute => 1,
            TtlUnit::Hour => 60,
            TtlUnit::Day => 24 * 60,
            TtlUnit::Week => 7 * 24 * 60,
            TtlUnit::Month => 30 * 24 * 60,
            TtlUnit::Year => 365 * 24 * 60,
        }
    }

    fn suffix(self) -> char {
        match self {
            TtlUnit::Minute => 'm',
            TtlUnit::Hour => 'h',
            TtlUnit::Day => 'd',
            TtlUnit::Week => 'w',
            TtlUnit::Month => 'M',
            TtlUnit::Year => 'y',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Ttl {
    pub count: u8,
    pub unit: TtlUnit,
}

impl Ttl {
    /// No expiry.
    pub const NONE: Ttl = Ttl {
        count: 0,
        unit: TtlUnit::Minute,
    };

    /// Parse strings like `"3m"`, `"4h"`, `"5d"`, `"6w"`, `"7M"`, `"8y"`.
    /// A bare number is minutes; empty or `"0"` means no TTL.
    pub fn parse(s: &str) -> MasterResult<Ttl> {
        if s.is_empty() || s == "0" {
            return Ok(Ttl::NONE);
        }
        let invalid = || MasterError::InvalidTtl(s.to_string());
        let (digits, unit) = match s.chars().last().ok_or_else(invalid)? {
            'm' => (&s[..s.len() - 1], TtlUnit::Minute),
            'h' => (&s[..s.len() - 1], TtlUnit::Hour),
            'd' => (&s[..s.len() - 1], TtlUnit::Day),
            'w' => (&s[..s.len() - 1], TtlUnit::Week),
            'M' => (&s[..s.len() - 1], TtlUnit::Month),
            'y' => (&s[..s.len() - 1], TtlUnit::Year),
            c if c.is_ascii_digit() => (s, TtlUnit::Minute),
            _ => return Err(invalid()),
        };
        let count: u8 = digits.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Ok(Ttl::NONE);
        }
        Ok(Ttl { count, unit })
    }

    pub fn is_none(self) -> bool {
        self.count == 0
    }

    pub fn minutes(self) -> u64 {
        self.count as u64 * self.unit.minutes()
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            return Ok(());
        }
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}
