//! Circuit-breaker memory limit parsing.
//!
//! The limit can be given either as an absolute size ("512kb", "4gb") or as a
//! percentage of physical memory ("50%"). Internally everything resolves to
//! kibibytes: native graphs run to gigabytes, and a KiB-denominated u64 total
//! cannot realistically overflow.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A capacity limit for native index memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MemoryLimit {
    /// Percentage of total physical memory, in (0, 100].
    Percentage(f64),
    /// Absolute limit in kibibytes.
    Kilobytes(u64),
}

impl MemoryLimit {
    /// Resolve the limit to KiB against the given total physical memory.
    pub fn resolve_kb_with_total(&self, total_memory_bytes: u64) -> u64 {
        match self {
            MemoryLimit::Percentage(pct) => {
                let total_kb = total_memory_bytes / 1024;
                ((pct / 100.0) * total_kb as f64) as u64
            }
            MemoryLimit::Kilobytes(kb) => *kb,
        }
    }

    /// Resolve the limit to KiB, probing the machine for total memory when
    /// the limit is percentage-based.
    pub fn resolve_kb(&self) -> u64 {
        match self {
            MemoryLimit::Percentage(_) => {
                let mut system = sysinfo::System::new();
                system.refresh_memory();
                self.resolve_kb_with_total(system.total_memory())
            }
            MemoryLimit::Kilobytes(kb) => *kb,
        }
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryLimit::Percentage(pct) => write!(f, "{}%", pct),
            MemoryLimit::Kilobytes(kb) => write!(f, "{}kb", kb),
        }
    }
}

impl FromStr for MemoryLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(ConfigError::InvalidLimit {
                value: s.to_string(),
                reason: "empty value".to_string(),
            });
        }

        if let Some(pct) = raw.strip_suffix('%') {
            let pct: f64 = pct.trim().parse().map_err(|_| ConfigError::InvalidLimit {
                value: s.to_string(),
                reason: "percentage is not a number".to_string(),
            })?;
            if pct <= 0.0 || pct > 100.0 {
                return Err(ConfigError::InvalidLimit {
                    value: s.to_string(),
                    reason: "percentage must be in (0, 100]".to_string(),
                });
            }
            return Ok(MemoryLimit::Percentage(pct));
        }

        let lower = raw.to_ascii_lowercase();
        let (digits, multiplier_kb) = if let Some(d) = lower.strip_suffix("kb") {
            (d, 1u64)
        } else if let Some(d) = lower.strip_suffix("mb") {
            (d, 1024)
        } else if let Some(d) = lower.strip_suffix("gb") {
            (d, 1024 * 1024)
        } else if let Some(d) = lower.strip_suffix("tb") {
            (d, 1024 * 1024 * 1024)
        } else {
            return Err(ConfigError::InvalidLimit {
                value: s.to_string(),
                reason: "expected a percentage or a size with kb/mb/gb/tb suffix".to_string(),
            });
        };

        let amount: u64 = digits.trim().parse().map_err(|_| ConfigError::InvalidLimit {
            value: s.to_string(),
            reason: "size is not a non-negative integer".to_string(),
        })?;
        if amount == 0 {
            return Err(ConfigError::InvalidLimit {
                value: s.to_string(),
                reason: "size must be positive".to_string(),
            });
        }

        amount
            .checked_mul(multiplier_kb)
            .map(MemoryLimit::Kilobytes)
            .ok_or_else(|| ConfigError::InvalidLimit {
                value: s.to_string(),
                reason: "size overflows".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percentage() {
        assert_eq!("50%".parse::<MemoryLimit>().unwrap(), MemoryLimit::Percentage(50.0));
        assert_eq!(" 12.5% ".parse::<MemoryLimit>().unwrap(), MemoryLimit::Percentage(12.5));
    }

    #[test]
    fn test_parse_absolute() {
        assert_eq!("512kb".parse::<MemoryLimit>().unwrap(), MemoryLimit::Kilobytes(512));
        assert_eq!("100MB".parse::<MemoryLimit>().unwrap(), MemoryLimit::Kilobytes(100 * 1024));
        assert_eq!(
            "4gb".parse::<MemoryLimit>().unwrap(),
            MemoryLimit::Kilobytes(4 * 1024 * 1024)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<MemoryLimit>().is_err());
        assert!("fifty".parse::<MemoryLimit>().is_err());
        assert!("0kb".parse::<MemoryLimit>().is_err());
        assert!("101%".parse::<MemoryLimit>().is_err());
        assert!("-5%".parse::<MemoryLimit>().is_err());
        assert!("512".parse::<MemoryLimit>().is_err());
    }

    #[test]
    fn test_resolve_percentage() {
        let limit = MemoryLimit::Percentage(50.0);
        // 8 GiB total -> 4 GiB in KiB
        assert_eq!(limit.resolve_kb_with_total(8 * 1024 * 1024 * 1024), 4 * 1024 * 1024);
    }

    #[test]
    fn test_resolve_absolute_ignores_total() {
        let limit = MemoryLimit::Kilobytes(70);
        assert_eq!(limit.resolve_kb_with_total(u64::MAX), 70);
    }
}
