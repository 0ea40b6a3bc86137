use std::{fmt::Display, num::NonZeroU16, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseHardwareError {
    #[error("invalid cpu count '{0}': expected a positive integer")]
    CpuCount(String),

    #[error("invalid size '{0}': expected digits with an optional K, M, G or T suffix")]
    Size(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuCount(NonZeroU16);

impl CpuCount {
    pub fn new(count: u16) -> Option<Self> {
        NonZeroU16::new(count).map(Self)
    }

    pub fn get(&self) -> u16 {
        self.0.get()
    }
}

impl Display for CpuCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CpuCount {
    type Err = ParseHardwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u16>()
            .ok()
            .and_then(CpuCount::new)
            .ok_or_else(|| ParseHardwareError::CpuCount(s.to_owned()))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeUnit {
    Bytes,
    Kibi,
    Mebi,
    Gibi,
    Tebi,
}

impl SizeUnit {
    fn suffix(&self) -> &'static str {
        match self {
            SizeUnit::Bytes => "",
            SizeUnit::Kibi => "K",
            SizeUnit::Mebi => "M",
            SizeUnit::Gibi => "G",
            SizeUnit::Tebi => "T",
        }
    }

    fn multiplier(&self) -> u64 {
        match self {
            SizeUnit::Bytes => 1,
            SizeUnit::Kibi => 1 << 10,
            SizeUnit::Mebi => 1 << 20,
            SizeUnit::Gibi => 1 << 30,
            SizeUnit::Tebi => 1 << 40,
        }
    }
}

/// A size as qemu and qemu-img spell it: `4G`, `512M`, `20480`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Size {
    value: u64,
    unit: SizeUnit,
}

impl Size {
    pub fn new(value: u64, unit: SizeUnit) -> Self {
        Self { value, unit }
    }

    pub fn bytes(&self) -> Option<u64> {
        self.value.checked_mul(self.unit.multiplier())
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

impl FromStr for Size {
    type Err = ParseHardwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseHardwareError::Size(s.to_owned());

        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, suffix) = trimmed.split_at(split);

        let unit = match suffix.to_ascii_uppercase().as_str() {
            "" | "B" => SizeUnit::Bytes,
            "K" => SizeUnit::Kibi,
            "M" => SizeUnit::Mebi,
            "G" => SizeUnit::Gibi,
            "T" => SizeUnit::Tebi,
            _ => return Err(invalid()),
        };
        let value = digits.parse::<u64>().map_err(|_| invalid())?;
        if value == 0 {
            return Err(invalid());
        }

        let size = Size { value, unit };
        size.bytes().ok_or_else(invalid)?;
        Ok(size)
    }
}
