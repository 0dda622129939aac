use url::Url;

use crate::{mp4::sidx::SegmentIndex, ByteRange, SegmentRequest, TsuzuriError, TsuzuriResult};

/// Turns the references of a `sidx` box into one byte-range request per subsegment.
///
/// `index_end` is the absolute position of the last byte of the `sidx` box in
/// the resource at `url`. The first subsegment starts `first_offset` bytes
/// after it, and every following one starts right after its predecessor.
pub fn index_ranges(url: &Url, index_end: u64, index: &SegmentIndex) -> TsuzuriResult<Vec<SegmentRequest>> {
    let mut start = index_end
        .checked_add(1)
        .and_then(|next| next.checked_add(index.first_offset))
        .ok_or_else(|| {
            TsuzuriError::InvalidByteRange(format!(
                "sidx first_offset {} past {index_end}",
                index.first_offset
            ))
        })?;

    index
        .references
        .iter()
        .map(|reference| {
            if reference.is_index {
                return Err(TsuzuriError::UnsupportedAddressing(
                    "sidx referencing another sidx".to_string(),
                ));
            }

            let size = reference.referenced_size as u64;
            let range = ByteRange::with_length(start, size).map_err(|_| {
                TsuzuriError::InvalidByteRange(format!("subsegment of {size} bytes at {start}"))
            })?;
            start = range.end().map_or(start, |last| last.saturating_add(1));

            let mut request = SegmentRequest::new(url.clone()).with_range(Some(range));
            if index.timescale > 0 {
                request = request.with_duration(reference.subsegment_duration as f64 / index.timescale as f64);
            }
            Ok(request)
        })
        .collect()
}
