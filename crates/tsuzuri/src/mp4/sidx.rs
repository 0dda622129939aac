use super::{find_first_box, BoxReader};
use crate::{TsuzuriError, TsuzuriResult};

/// A parsed Segment Index Box (`sidx`), ISO/IEC 14496-12 8.16.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentIndex {
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    /// Distance from the end of this box to the first referenced byte.
    pub first_offset: u64,
    pub references: Vec<IndexReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReference {
    /// `true` when the reference points at another `sidx` instead of media.
    pub is_index: bool,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
}

impl SegmentIndex {
    /// Parses the body of a `sidx` box (everything after the box header).
    pub fn parse(body: &[u8]) -> TsuzuriResult<Self> {
        let mut reader = BoxReader::new("sidx", body);
        let (version, _flags) = reader.read_full_box_header()?;
        let _reference_id = reader.read_u32()?;
        let timescale = reader.read_u32()?;
        let (earliest_presentation_time, first_offset) = if version == 0 {
            (reader.read_u32()? as u64, reader.read_u32()? as u64)
        } else {
            (reader.read_u64()?, reader.read_u64()?)
        };
        reader.skip(2)?;
        let reference_count = reader.read_u16()?;

        let references = (0..reference_count)
            .map(|_| {
                let size = reader.read_u32()?;
                let subsegment_duration = reader.read_u32()?;
                let sap = reader.read_u32()?;
                Ok(IndexReference {
                    is_index: size & 0x8000_0000 != 0,
                    referenced_size: size & 0x7fff_ffff,
                    subsegment_duration,
                    starts_with_sap: sap & 0x8000_0000 != 0,
                })
            })
            .collect::<TsuzuriResult<Vec<_>>>()?;

        Ok(Self {
            timescale,
            earliest_presentation_time,
            first_offset,
            references,
        })
    }

    /// Locates and parses the first `sidx` box inside `data`.
    ///
    /// Returns the index together with the offset just past the box.
    pub fn find(data: &[u8]) -> TsuzuriResult<(Self, usize)> {
        let view = find_first_box(data, 0, data.len(), *b"sidx").ok_or(TsuzuriError::MissingBox("sidx"))?;
        let index = Self::parse(&data[view.body_start..view.end])?;
        Ok((index, view.end))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mp4::tests::make_box;

    pub(crate) fn make_sidx(timescale: u32, first_offset: u32, refs: &[(u32, u32)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&timescale.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&first_offset.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(&(refs.len() as u16).to_be_bytes());
        for (size, duration) in refs {
            body.extend_from_slice(&size.to_be_bytes());
            body.extend_from_slice(&duration.to_be_bytes());
            body.extend_from_slice(&0x9000_0000u32.to_be_bytes());
        }
        make_box(b"sidx", &body)
    }

    #[test]
    fn test_parse_sidx() {
        let data = make_sidx(1000, 0, &[(100, 2000), (250, 2000), (40, 500)]);
        let (index, end) = SegmentIndex::find(&data).unwrap();

        assert_eq!(end, data.len());
        assert_eq!(index.timescale, 1000);
        assert_eq!(index.references.len(), 3);
        assert_eq!(index.references[1].referenced_size, 250);
        assert_eq!(index.references[2].subsegment_duration, 500);
        assert!(index.references[0].starts_with_sap);
        assert!(!index.references[0].is_index);
    }

    #[test]
    fn test_missing_sidx() {
        let data = make_box(b"free", &[0; 4]);
        assert!(matches!(
            SegmentIndex::find(&data),
            Err(TsuzuriError::MissingBox("sidx"))
        ));
    }

    #[test]
    fn test_truncated_sidx() {
        let mut data = make_sidx(1000, 0, &[(100, 2000)]);
        let len = data.len() as u32 - 4;
        data.truncate(len as usize);
        data[..4].copy_from_slice(&len.to_be_bytes());
        assert!(matches!(
            SegmentIndex::find(&data),
            Err(TsuzuriError::MalformedBox { .. })
        ));
    }
}
