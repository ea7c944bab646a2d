use std::fmt;
use std::str::FromStr;

use rowsieve_error::{DbError, ErrorKind, Result};

/// What to do once a distinct set grows past its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowMode {
    /// Fail the query.
    #[default]
    Strict,
    /// Stop deduplicating and emit every remaining row unfiltered.
    ///
    /// Output may contain duplicates once this kicks in.
    Passthrough,
}

impl FromStr for OverflowMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "strict" => Self::Strict,
            "passthrough" => Self::Passthrough,
            other => {
                return Err(DbError::new(format!(
                    "Invalid overflow mode '{other}', expected 'strict' or 'passthrough'"
                )));
            }
        })
    }
}

impl fmt::Display for OverflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// Current row and byte footprint of a distinct set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetUsage {
    pub rows: usize,
    pub bytes: usize,
}

/// Result of checking set usage against the limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCheck {
    Within,
    /// Limits exceeded with passthrough overflow.
    Passthrough,
}

/// Caps on the size of a distinct set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeLimits {
    pub max_rows: Option<usize>,
    pub max_bytes: Option<usize>,
    pub overflow_mode: OverflowMode,
}

impl SizeLimits {
    pub const fn unlimited() -> Self {
        SizeLimits {
            max_rows: None,
            max_bytes: None,
            overflow_mode: OverflowMode::Strict,
        }
    }

    pub const fn has_limits(&self) -> bool {
        self.max_rows.is_some() || self.max_bytes.is_some()
    }

    /// Returns true if `usage` is greater than either limit.
    pub fn is_exceeded(&self, usage: SetUsage) -> bool {
        let rows_exceeded = self.max_rows.is_some_and(|max| usage.rows > max);
        let bytes_exceeded = self.max_bytes.is_some_and(|max| usage.bytes > max);
        rows_exceeded || bytes_exceeded
    }

    /// Check usage against the limits.
    ///
    /// Errors with `SetLimitExceeded` if the limits are exceeded in strict
    /// mode.
    pub fn check(&self, usage: SetUsage) -> Result<LimitCheck> {
        if !self.is_exceeded(usage) {
            return Ok(LimitCheck::Within);
        }

        match self.overflow_mode {
            OverflowMode::Strict => Err(DbError::new("Distinct set size limit exceeded")
                .with_kind(ErrorKind::SetLimitExceeded)
                .with_field("max_rows", display_limit(self.max_rows))
                .with_field("max_bytes", display_limit(self.max_bytes))
                .with_field("rows", usage.rows)
                .with_field("bytes", usage.bytes)),
            OverflowMode::Passthrough => Ok(LimitCheck::Passthrough),
        }
    }
}

impl fmt::Display for SizeLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows={}, bytes={}, overflow={}",
            display_limit(self.max_rows),
            display_limit(self.max_bytes),
            self.overflow_mode
        )
    }
}

fn display_limit(limit: Option<usize>) -> String {
    match limit {
        Some(limit) => limit.to_string(),
        None => "unlimited".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_exceeded() {
        let limits = SizeLimits::unlimited();
        let usage = SetUsage {
            rows: usize::MAX,
            bytes: usize::MAX,
        };
        assert_eq!(LimitCheck::Within, limits.check(usage).unwrap());
    }

    #[test]
    fn at_limit_is_within() {
        let limits = SizeLimits {
            max_rows: Some(4),
            ..SizeLimits::unlimited()
        };
        let usage = SetUsage { rows: 4, bytes: 0 };
        assert_eq!(LimitCheck::Within, limits.check(usage).unwrap());
    }

    #[test]
    fn strict_exceeded_reports_usage() {
        let limits = SizeLimits {
            max_rows: None,
            max_bytes: Some(100),
            overflow_mode: OverflowMode::Strict,
        };
        let usage = SetUsage {
            rows: 3,
            bytes: 101,
        };

        let err = limits.check(usage).unwrap_err();
        assert_eq!(ErrorKind::SetLimitExceeded, err.kind());
        assert_eq!(Some("unlimited"), err.get_field("max_rows"));
        assert_eq!(Some("100"), err.get_field("max_bytes"));
        assert_eq!(Some("3"), err.get_field("rows"));
        assert_eq!(Some("101"), err.get_field("bytes"));
    }

    #[test]
    fn passthrough_exceeded() {
        let limits = SizeLimits {
            max_rows: Some(1),
            max_bytes: None,
            overflow_mode: OverflowMode::Passthrough,
        };
        let usage = SetUsage { rows: 2, bytes: 0 };
        assert_eq!(LimitCheck::Passthrough, limits.check(usage).unwrap());
    }

    #[test]
    fn parse_overflow_mode() {
        assert_eq!(OverflowMode::Strict, "strict".parse().unwrap());
        assert_eq!(OverflowMode::Passthrough, "passthrough".parse().unwrap());
        "throw".parse::<OverflowMode>().unwrap_err();
    }
}
