//! Split strings: `name` or `name[start:end]`
//!
//! Bounds are integers or percentages (`train[:10%]`). Negative bounds count
//! from the end of the split. Percent bounds round to the closest example.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use ml_stream_core::{Error, Result};

/// One end of a split slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitBound {
    /// Example offset; negative counts from the end
    Absolute(i64),

    /// Percentage of the split in `-100..=100`; negative counts from the end
    Percent(i64),
}

impl SplitBound {
    /// Offset into a split of `len` examples, clamped to `0..=len`
    pub fn resolve(self, len: u64) -> u64 {
        let len_i = i128::from(len);
        let offset = match self {
            SplitBound::Absolute(v) => i128::from(v),
            // Round half away from zero, like `round()` on the exact fraction.
            SplitBound::Percent(p) => {
                let scaled = len_i * i128::from(p);
                (scaled + scaled.signum() * 50) / 100
            }
        };
        let offset = if offset < 0 { len_i + offset } else { offset };
        // Clamped to 0..=len, which fits u64.
        u64::try_from(offset.clamp(0, len_i)).unwrap_or(len)
    }
}

impl fmt::Display for SplitBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitBound::Absolute(v) => write!(f, "{v}"),
            SplitBound::Percent(p) => write!(f, "{p}%"),
        }
    }
}

impl FromStr for SplitBound {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("invalid split bound '{s}'"));
        match s.strip_suffix('%') {
            Some(p) => {
                let p: i64 = p.parse().map_err(|_| invalid())?;
                if !(-100..=100).contains(&p) {
                    return Err(invalid());
                }
                Ok(SplitBound::Percent(p))
            }
            None => s.parse().map(SplitBound::Absolute).map_err(|_| invalid()),
        }
    }
}

/// A named split, optionally sliced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSpec {
    name: String,
    start: Option<SplitBound>,
    end: Option<SplitBound>,
}

impl SplitSpec {
    /// The whole split `name`
    pub fn whole(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            end: None,
        }
    }

    /// A slice of split `name`
    pub fn slice(name: impl Into<String>, start: Option<SplitBound>, end: Option<SplitBound>) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    /// Parse `name` or `name[start:end]`
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Name of the underlying split
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether only part of the split is selected
    pub fn is_slice(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// Example range selected from a split of `len` examples
    pub fn resolve(&self, len: u64) -> Range<u64> {
        let start = self.start.map_or(0, |b| b.resolve(len));
        let end = self.end.map_or(len, |b| b.resolve(len));
        start..end.max(start)
    }
}

impl FromStr for SplitSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("invalid split '{s}'"));
        let s_trimmed = s.trim();
        let Some(open) = s_trimmed.find('[') else {
            if s_trimmed.is_empty() || s_trimmed.contains(']') {
                return Err(invalid());
            }
            return Ok(Self::whole(s_trimmed));
        };
        let name = &s_trimmed[..open];
        let body = s_trimmed[open + 1..].strip_suffix(']').ok_or_else(invalid)?;
        let (start, end) = body.split_once(':').ok_or_else(invalid)?;
        if name.is_empty() {
            return Err(invalid());
        }
        let bound = |b: &str| -> Result<Option<SplitBound>> {
            let b = b.trim();
            if b.is_empty() {
                Ok(None)
            } else {
                b.parse().map(Some)
            }
        };
        Ok(Self::slice(name, bound(start)?, bound(end)?))
    }
}

impl fmt::Display for SplitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.is_slice() {
            write!(f, "[")?;
            if let Some(start) = self.start {
                write!(f, "{start}")?;
            }
            write!(f, ":")?;
            if let Some(end) = self.end {
                write!(f, "{end}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
