//! Byte ranges for partial delivery.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open byte range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Build a non-empty range.
    pub fn new(start: u64, end: u64) -> crate::Result<Self> {
        if end <= start {
            return Err(crate::Error::InvalidRange(format!(
                "range [{start}, {end}) is empty or inverted"
            )));
        }
        Ok(Self { start, end })
    }

    /// The whole resource.
    pub fn full(total: u64) -> Self {
        Self {
            start: 0,
            end: total,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Content-Range` value for this range of a resource of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end.saturating_sub(1), total)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A requested range before it is checked against the resource length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RangeSpec {
    /// `[start, end)`; `end` may run past the resource and is clamped.
    Bounded { start: u64, end: u64 },
    /// From `start` to the end of the resource.
    From { start: u64 },
    /// The last `len` bytes.
    Suffix { len: u64 },
}

/// Why a range could not be served.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RangeError {
    /// The range starts at or past the end of the resource.
    NotSatisfiable { total: u64 },
    /// The range itself is malformed (empty, inverted).
    Invalid(String),
}

impl RangeSpec {
    /// Parse an HTTP `Range` header value.
    ///
    /// Accepts a single `bytes=a-b`, `bytes=a-` or `bytes=-n`. The inclusive
    /// HTTP end is converted to a half-open bound.
    pub fn parse_header(value: &str) -> crate::Result<Self> {
        let value = value.trim();
        let Some(spec) = value.strip_prefix("bytes=") else {
            return Err(crate::Error::InvalidRange(format!(
                "unsupported range unit: {value:?}"
            )));
        };
        if spec.contains(',') {
            return Err(crate::Error::InvalidRange(
                "multiple ranges are not supported".to_string(),
            ));
        }
        let Some((first, last)) = spec.trim().split_once('-') else {
            return Err(crate::Error::InvalidRange(format!(
                "malformed range: {value:?}"
            )));
        };
        let parse = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| crate::Error::InvalidRange(format!("malformed range: {value:?}")))
        };

        match (first.trim().is_empty(), last.trim().is_empty()) {
            (true, true) => Err(crate::Error::InvalidRange(format!(
                "malformed range: {value:?}"
            ))),
            (true, false) => Ok(Self::Suffix { len: parse(last)? }),
            (false, true) => Ok(Self::From {
                start: parse(first)?,
            }),
            (false, false) => {
                let start = parse(first)?;
                let last = parse(last)?;
                if last < start {
                    return Err(crate::Error::InvalidRange(format!(
                        "range end {last} precedes start {start}"
                    )));
                }
                Ok(Self::Bounded {
                    start,
                    end: last.saturating_add(1),
                })
            }
        }
    }

    /// Check the request against a resource of `total` bytes.
    ///
    /// Starts at or beyond `total` are unsatisfiable; ends beyond `total`
    /// are clamped.
    pub fn resolve(self, total: u64) -> Result<ByteRange, RangeError> {
        match self {
            Self::Bounded { start, end } => {
                if end <= start {
                    return Err(RangeError::Invalid(format!(
                        "range [{start}, {end}) is empty or inverted"
                    )));
                }
                if start >= total {
                    return Err(RangeError::NotSatisfiable { total });
                }
                Ok(ByteRange {
                    start,
                    end: end.min(total),
                })
            }
            Self::From { start } => {
                if start >= total {
                    return Err(RangeError::NotSatisfiable { total });
                }
                Ok(ByteRange { start, end: total })
            }
            Self::Suffix { len } => {
                if len == 0 || total == 0 {
                    return Err(RangeError::NotSatisfiable { total });
                }
                Ok(ByteRange {
                    start: total - len.min(total),
                    end: total,
                })
            }
        }
    }
}

impl From<ByteRange> for RangeSpec {
    fn from(range: ByteRange) -> Self {
        Self::Bounded {
            start: range.start,
            end: range.end,
        }
    }
}
