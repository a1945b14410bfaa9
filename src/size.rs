// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Swap size parsing.
//!
//! Swap sizes are written the way operators usually type them: an integer
//! followed by an optional binary unit suffix, e.g., "32G", "512M", or
//! "18GiB". Every unit is a power of 1024. A bare integer is a byte count.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

const GIB: u64 = 1024 * 1024 * 1024;

/// Extra head room added on top of physical memory for the default size.
const DEFAULT_HEADROOM_GIB: u64 = 2;

/// Binary size unit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    #[default]
    Byte,
    Kibi,
    Mebi,
    Gibi,
    Tebi,
    Pebi,
    Exbi,
}

impl Unit {
    fn exponent(self) -> u32 {
        match self {
            Self::Byte => 0,
            Self::Kibi => 1,
            Self::Mebi => 2,
            Self::Gibi => 3,
            Self::Tebi => 4,
            Self::Pebi => 5,
            Self::Exbi => 6,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Byte => "",
            Self::Kibi => "K",
            Self::Mebi => "M",
            Self::Gibi => "G",
            Self::Tebi => "T",
            Self::Pebi => "P",
            Self::Exbi => "E",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        let mut chars = suffix.chars();
        let unit = match chars.next().map(|c| c.to_ascii_uppercase()) {
            None => return Some(Self::Byte),
            Some('B') if suffix.len() == 1 => return Some(Self::Byte),
            Some('K') => Self::Kibi,
            Some('M') => Self::Mebi,
            Some('G') => Self::Gibi,
            Some('T') => Self::Tebi,
            Some('P') => Self::Pebi,
            Some('E') => Self::Exbi,
            _ => return None,
        };

        // INVARIANT: Only "", "i", "iB", or "B" may trail the unit letter.
        match chars.as_str() {
            "" | "i" | "iB" | "ib" | "B" | "b" => Some(unit),
            _ => None,
        }
    }
}

/// Requested swap size.
///
/// Keeps the value and unit the operator asked for, so that it can be shown
/// back to them in the same form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSize {
    value: u64,
    unit: Unit,
}

impl SwapSize {
    /// Construct new swap size.
    pub fn new(value: u64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Default swap size for a host with `mem_total` bytes of memory.
    ///
    /// Physical memory is rounded up to whole gibibytes before the head room
    /// is added, so a host reporting slightly less than 16 GiB still gets
    /// "18G".
    pub fn default_for_memory(mem_total: u64) -> Self {
        let gib = mem_total.div_ceil(GIB);
        Self::new(gib + DEFAULT_HEADROOM_GIB, Unit::Gibi)
    }

    /// Size in bytes.
    ///
    /// # Errors
    ///
    /// - Return [`SizeError::Overflow`] if the size does not fit in 64 bits.
    pub fn bytes(&self) -> Result<u64> {
        1024u64
            .checked_pow(self.unit.exponent())
            .and_then(|scale| self.value.checked_mul(scale))
            .ok_or_else(|| SizeError::Overflow(self.to_string()))
    }
}

impl FromStr for SwapSize {
    type Err = SizeError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let data = data.trim();
        let split = data
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(data.len());
        let (digits, suffix) = data.split_at(split);

        if digits.is_empty() {
            return Err(SizeError::Invalid(data.into()));
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| SizeError::Overflow(data.into()))?;
        if value == 0 {
            return Err(SizeError::Zero);
        }

        let unit = Unit::from_suffix(suffix).ok_or_else(|| SizeError::Invalid(data.into()))?;
        let size = Self::new(value, unit);

        // INVARIANT: Reject sizes whose byte count cannot be represented.
        size.bytes()?;

        Ok(size)
    }
}

impl Display for SwapSize {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}{}", self.value, self.unit.suffix())
    }
}

/// Extract total physical memory in bytes from `/proc/meminfo` contents.
///
/// # Errors
///
/// - Return [`SizeError::MemInfo`] if the "MemTotal" field is missing or
///   malformed.
pub fn parse_meminfo(meminfo: &str) -> Result<u64> {
    let kib = meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or(SizeError::MemInfo)?;

    Ok(kib * 1024)
}

/// Swap size parsing error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SizeError {
    /// Size is not an integer followed by a binary unit suffix.
    #[error("invalid swap size {0:?}, expected an integer with an optional K/M/G/T suffix")]
    Invalid(String),

    /// Size is zero.
    #[error("swap size must be greater than zero")]
    Zero,

    /// Byte count does not fit in 64 bits.
    #[error("swap size {0:?} is too large")]
    Overflow(String),

    /// Memory information does not list total memory.
    #[error("cannot determine total memory from meminfo")]
    MemInfo,
}

/// Friendly result alias :3
pub type Result<T, E = SizeError> = std::result::Result<T, E>;
