use std::str::FromStr;

use crate::{TsuzuriError, TsuzuriResult};

/// A contiguous byte span inside a resource.
///
/// `length == None` means "from `offset` to the end of the resource".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Builds a bounded range of `length` bytes, which must not be empty.
    pub fn with_length(offset: u64, length: u64) -> TsuzuriResult<Self> {
        match length.checked_sub(1).and_then(|last| offset.checked_add(last)) {
            Some(_) => Ok(Self::new(offset, Some(length))),
            None => Err(TsuzuriError::InvalidByteRange(format!("{length}@{offset}"))),
        }
    }

    /// Builds a range from inclusive `start` and `end` positions.
    pub fn from_bounds(start: u64, end: u64) -> TsuzuriResult<Self> {
        if end < start {
            return Err(TsuzuriError::InvalidByteRange(format!("{start}-{end}")));
        }
        Ok(Self::new(start, Some(end - start + 1)))
    }

    /// Inclusive position of the last byte, if the range is bounded.
    pub fn end(&self) -> Option<u64> {
        self.length
            .and_then(|length| length.checked_sub(1))
            .and_then(|last| self.offset.checked_add(last))
    }

    pub fn to_http_range(&self) -> String {
        if let Some(end) = self.end() {
            format!("bytes={}-{}", self.offset, end)
        } else {
            format!("bytes={}-", self.offset)
        }
    }
}

/// The byte range shall be expressed and formatted as a byte-range-spec as defined in
/// IETF RFC 7233:2014, subclause 2.1. It is restricted to a single expression identifying
/// a contiguous range of bytes.
impl FromStr for ByteRange {
    type Err = TsuzuriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TsuzuriError::InvalidByteRange(s.to_string());

        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let first_byte_pos = start.trim().parse::<u64>().map_err(|_| invalid())?;

        let end = end.trim();
        if end.is_empty() {
            return Ok(ByteRange::new(first_byte_pos, None));
        }

        let last_byte_pos = end.parse::<u64>().map_err(|_| invalid())?;
        // 0-500 means 501 bytes
        ByteRange::from_bounds(first_byte_pos, last_byte_pos).map_err(|_| invalid())
    }
}
