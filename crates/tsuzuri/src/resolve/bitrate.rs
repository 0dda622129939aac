use crate::{HttpClient, SegmentRequest, TsuzuriError, TsuzuriResult};

/// `floor(size_bits / duration)` in bits per second.
pub fn bandwidth_from(size_bits: u64, duration: f64) -> TsuzuriResult<u64> {
    if duration.is_nan() || duration <= 0.0 {
        return Err(TsuzuriError::UnknownBitrate(duration));
    }
    Ok((size_bits as f64 / duration).floor() as u64)
}

/// Estimates the bitrate of a stream from the size of its middle segment.
pub async fn probe(client: &HttpClient, segments: &[SegmentRequest]) -> TsuzuriResult<u64> {
    let middle = segments
        .get(segments.len() / 2)
        .ok_or(TsuzuriError::NoSegments)?;

    // Fail before touching the network when the answer can not be computed
    let duration = middle.duration.unwrap_or(0.0);
    if duration.is_nan() || duration <= 0.0 {
        return Err(TsuzuriError::UnknownBitrate(duration));
    }

    let size = match middle.size {
        Some(size) => size,
        None => client.content_length(&middle.url, middle.byte_range).await?,
    };
    tracing::debug!("Probed {} bytes over {duration}s from {}", size, middle.url);

    bandwidth_from(size * 8, duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandwidth_from() {
        assert_eq!(bandwidth_from(800000, 4.0).unwrap(), 200000);
        assert_eq!(bandwidth_from(1001, 2.0).unwrap(), 500);
    }

    #[test]
    fn test_bandwidth_requires_duration() {
        assert!(matches!(
            bandwidth_from(800000, 0.0),
            Err(TsuzuriError::UnknownBitrate(_))
        ));
        assert!(matches!(
            bandwidth_from(800000, -1.0),
            Err(TsuzuriError::UnknownBitrate(_))
        ));
    }
}
