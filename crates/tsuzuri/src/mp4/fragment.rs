use super::{boxes_in, find_first_box, init::TrackDefaults, BoxReader};
use crate::{TsuzuriError, TsuzuriResult};

/// Sample totals of one media segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FragmentSummary {
    pub sample_count: u64,
    pub sample_bytes: u64,
    /// Sum of sample durations in timescale ticks.
    pub duration: u64,
}

struct TrackFragmentHeader {
    track_id: u32,
    default_sample_duration: Option<u32>,
    default_sample_size: Option<u32>,
}

/// Sums sample sizes and durations over every `moof/traf/trun` in `data`.
///
/// Values missing from `trun` fall back to `tfhd`, then to the `trex` defaults.
pub fn summarize(data: &[u8], defaults: &[TrackDefaults]) -> TsuzuriResult<FragmentSummary> {
    let mut summary = FragmentSummary::default();

    for moof in boxes_in(data, 0, data.len()).filter(|b| &b.fourcc == b"moof") {
        for traf in boxes_in(data, moof.body_start, moof.end).filter(|b| &b.fourcc == b"traf") {
            let tfhd = find_first_box(data, traf.body_start, traf.end, *b"tfhd")
                .ok_or(TsuzuriError::MissingBox("tfhd"))?;
            let header = parse_tfhd(&data[tfhd.body_start..tfhd.end])?;

            let track = defaults.iter().find(|d| d.track_id == header.track_id);
            let default_duration = header
                .default_sample_duration
                .or(track.map(|t| t.default_sample_duration))
                .unwrap_or(0);
            let default_size = header
                .default_sample_size
                .or(track.map(|t| t.default_sample_size))
                .unwrap_or(0);

            for trun in boxes_in(data, traf.body_start, traf.end).filter(|b| &b.fourcc == b"trun") {
                parse_trun(
                    &data[trun.body_start..trun.end],
                    default_duration,
                    default_size,
                    &mut summary,
                )?;
            }
        }
    }

    Ok(summary)
}

fn parse_tfhd(body: &[u8]) -> TsuzuriResult<TrackFragmentHeader> {
    let mut reader = BoxReader::new("tfhd", body);
    let (_, flags) = reader.read_full_box_header()?;
    let track_id = reader.read_u32()?;

    if flags & 0x01 != 0 {
        reader.skip(8)?; // base_data_offset
    }
    if flags & 0x02 != 0 {
        reader.skip(4)?; // sample_description_index
    }
    let default_sample_duration = if flags & 0x08 != 0 {
        Some(reader.read_u32()?)
    } else {
        None
    };
    let default_sample_size = if flags & 0x10 != 0 {
        Some(reader.read_u32()?)
    } else {
        None
    };

    Ok(TrackFragmentHeader {
        track_id,
        default_sample_duration,
        default_sample_size,
    })
}

fn parse_trun(
    body: &[u8],
    default_duration: u32,
    default_size: u32,
    summary: &mut FragmentSummary,
) -> TsuzuriResult<()> {
    let mut reader = BoxReader::new("trun", body);
    let (_, flags) = reader.read_full_box_header()?;
    let sample_count = reader.read_u32()?;

    if flags & 0x001 != 0 {
        reader.skip(4)?; // data_offset
    }
    if flags & 0x004 != 0 {
        reader.skip(4)?; // first_sample_flags
    }

    for _ in 0..sample_count {
        let duration = if flags & 0x100 != 0 {
            reader.read_u32()?
        } else {
            default_duration
        };
        let size = if flags & 0x200 != 0 {
            reader.read_u32()?
        } else {
            default_size
        };
        if flags & 0x400 != 0 {
            reader.skip(4)?;
        }
        if flags & 0x800 != 0 {
            reader.skip(4)?;
        }

        summary.duration += duration as u64;
        summary.sample_bytes += size as u64;
    }
    summary.sample_count += sample_count as u64;

    Ok(())
}
