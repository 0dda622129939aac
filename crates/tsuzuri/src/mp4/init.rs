use super::{fourcc_str, BoxReader, Mp4Box};
use crate::{protection::KeyId, TsuzuriError, TsuzuriResult};

/// A Protection System Specific Header box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub system_id: [u8; 16],
    pub key_ids: Vec<KeyId>,
    pub data: Vec<u8>,
    /// The complete box, header included.
    pub raw: Vec<u8>,
}

impl PsshBox {
    fn from_box(pssh: &Mp4Box) -> TsuzuriResult<Self> {
        let mut reader = BoxReader::new("pssh", &pssh.data);
        let (version, _) = reader.read_full_box_header()?;
        let system_id = reader.read_array::<16>()?;

        let mut key_ids = Vec::new();
        if version > 0 {
            let count = reader.read_u32()?;
            for _ in 0..count {
                key_ids.push(KeyId(reader.read_array()?));
            }
        }

        let size = reader.read_u32()? as usize;
        let data = reader.read_bytes(size)?.to_vec();

        Ok(Self {
            system_id,
            key_ids,
            data,
            raw: pssh.encode(),
        })
    }
}

/// Sample defaults declared by `trex` for one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackDefaults {
    pub track_id: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
}

/// What the orchestrator needs to know about an initialization segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitSegmentInfo {
    pub timescale: Option<u32>,
    pub default_kid: Option<KeyId>,
    pub pssh: Vec<PsshBox>,
    /// Whether any sample entry is `encv` or `enca`.
    pub encrypted: bool,
    pub track_defaults: Vec<TrackDefaults>,
}

fn find_moov(boxes: &[Mp4Box]) -> TsuzuriResult<&Mp4Box> {
    boxes
        .iter()
        .find(|b| &b.kind == b"moov")
        .ok_or(TsuzuriError::MissingBox("moov"))
}

/// Reads timescale, protection and track defaults from an initialization segment.
pub fn inspect(data: &[u8]) -> TsuzuriResult<InitSegmentInfo> {
    let boxes = Mp4Box::parse_all(data)?;
    let moov = find_moov(&boxes)?;
    let trak = moov.child(b"trak").ok_or(TsuzuriError::MissingBox("trak"))?;

    let timescale = trak
        .find_path(&[b"mdia", b"mdhd"])
        .map(|mdhd| parse_mdhd_timescale(&mdhd.data))
        .transpose()?;

    let mut default_kid = None;
    for tenc in moov.descendants(b"tenc") {
        let kid = parse_tenc_kid(&tenc.data)?;
        if !kid.is_zero() {
            default_kid = Some(kid);
            break;
        }
    }

    let pssh = boxes
        .iter()
        .filter(|b| &b.kind == b"pssh")
        .chain(moov.descendants(b"pssh"))
        .map(PsshBox::from_box)
        .collect::<TsuzuriResult<Vec<_>>>()?;

    let encrypted = !moov.descendants(b"encv").is_empty() || !moov.descendants(b"enca").is_empty();

    let track_defaults = moov
        .descendants(b"trex")
        .into_iter()
        .map(|trex| parse_trex(&trex.data))
        .collect::<TsuzuriResult<Vec<_>>>()?;

    Ok(InitSegmentInfo {
        timescale,
        default_kid,
        pssh,
        encrypted,
        track_defaults,
    })
}

fn parse_mdhd_timescale(body: &[u8]) -> TsuzuriResult<u32> {
    let mut reader = BoxReader::new("mdhd", body);
    let (version, _) = reader.read_full_box_header()?;
    if version == 1 {
        reader.skip(16)?;
    } else {
        reader.skip(8)?;
    }
    reader.read_u32()
}

fn parse_tenc_kid(body: &[u8]) -> TsuzuriResult<KeyId> {
    let mut reader = BoxReader::new("tenc", body);
    reader.read_full_box_header()?;
    // reserved, crypt/skip byte block (or reserved), isProtected, Per_Sample_IV_Size
    reader.skip(4)?;
    Ok(KeyId(reader.read_array()?))
}

fn parse_trex(body: &[u8]) -> TsuzuriResult<TrackDefaults> {
    let mut reader = BoxReader::new("trex", body);
    reader.read_full_box_header()?;
    let track_id = reader.read_u32()?;
    let _sample_description_index = reader.read_u32()?;
    let default_sample_duration = reader.read_u32()?;
    let default_sample_size = reader.read_u32()?;
    Ok(TrackDefaults {
        track_id,
        default_sample_duration,
        default_sample_size,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RewriteOptions {
    /// Drop `pssh`/`sinf` and restore the original sample entry format.
    pub strip_protection: bool,
    /// Drop `edts` boxes.
    pub remove_edit_lists: bool,
}

/// Re-encodes an initialization segment with the requested boxes removed.
pub fn rewrite(data: &[u8], options: RewriteOptions) -> TsuzuriResult<Vec<u8>> {
    let mut boxes = Mp4Box::parse_all(data)?;
    find_moov(&boxes)?;

    if options.strip_protection {
        boxes.retain(|b| &b.kind != b"pssh");
    }

    let mut error = None;
    for moov in boxes.iter_mut().filter(|b| &b.kind == b"moov") {
        if options.strip_protection {
            moov.children.retain(|b| &b.kind != b"pssh");
        }

        moov.visit_mut(&mut |b| {
            if options.remove_edit_lists && &b.kind == b"trak" {
                b.children.retain(|c| &c.kind != b"edts");
            }
            if options.strip_protection && (&b.kind == b"encv" || &b.kind == b"enca") {
                if let Err(e) = restore_sample_entry(b) {
                    error.get_or_insert(e);
                }
            }
        });
    }
    if let Some(e) = error {
        return Err(e);
    }

    Ok(Mp4Box::encode_all(&boxes))
}

/// Renames `encv`/`enca` back to the format recorded in `sinf/frma` and drops `sinf`.
fn restore_sample_entry(entry: &mut Mp4Box) -> TsuzuriResult<()> {
    let frma = entry
        .find_path(&[b"sinf", b"frma"])
        .ok_or(TsuzuriError::MissingBox("frma"))?;
    let format: [u8; 4] = frma
        .data
        .get(..4)
        .and_then(|f| f.try_into().ok())
        .ok_or_else(|| TsuzuriError::malformed("frma", "too short"))?;

    tracing::debug!(
        "Restoring sample entry {} to {}",
        fourcc_str(&entry.kind),
        fourcc_str(&format)
    );
    entry.kind = format;
    entry.children.retain(|c| &c.kind != b"sinf");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mp4::tests::make_box;

    pub(crate) const KID: [u8; 16] = [0x11; 16];

    fn full_box(kind: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
        let mut data = vec![version, 0, 0, 0];
        data.extend_from_slice(body);
        make_box(kind, &data)
    }

    pub(crate) fn make_pssh(system_id: [u8; 16], data: &[u8]) -> Vec<u8> {
        let mut body = system_id.to_vec();
        body.extend_from_slice(&(data.len() as u32).to_be_bytes());
        body.extend_from_slice(data);
        full_box(b"pssh", 0, &body)
    }

    /// ftyp + moov with one encrypted video track, an edit list and a pssh.
    pub(crate) fn make_encrypted_init(timescale: u32, pssh: &[u8]) -> Vec<u8> {
        let mut mdhd = vec![0u8; 8];
        mdhd.extend_from_slice(&timescale.to_be_bytes());
        mdhd.extend_from_slice(&[0u8; 8]);
        let mdhd = full_box(b"mdhd", 0, &mdhd);

        let mut tenc = vec![0, 0, 1, 8];
        tenc.extend_from_slice(&KID);
        let tenc = full_box(b"tenc", 0, &tenc);

        let mut sinf = make_box(b"frma", b"avc1");
        sinf.extend(full_box(b"schm", 0, b"cenc\x00\x01\x00\x00"));
        sinf.extend(make_box(b"schi", &tenc));
        let sinf = make_box(b"sinf", &sinf);

        let mut encv = vec![0u8; 78];
        encv.extend(make_box(b"avcC", &[1, 2, 3]));
        encv.extend(sinf);
        let encv = make_box(b"encv", &encv);

        let mut stsd = vec![0, 0, 0, 0, 0, 0, 0, 1];
        stsd.extend(encv);
        let stbl = make_box(b"stbl", &make_box(b"stsd", &stsd));
        let minf = make_box(b"minf", &stbl);

        let mut mdia = mdhd;
        mdia.extend(minf);
        let mdia = make_box(b"mdia", &mdia);

        let mut trak = full_box(b"tkhd", 0, &[0u8; 80]);
        trak.extend(make_box(b"edts", &full_box(b"elst", 0, &[0u8; 16])));
        trak.extend(mdia);
        let trak = make_box(b"trak", &trak);

        let mut trex = 1u32.to_be_bytes().to_vec();
        trex.extend_from_slice(&1u32.to_be_bytes());
        trex.extend_from_slice(&1000u32.to_be_bytes());
        trex.extend_from_slice(&0u32.to_be_bytes());
        trex.extend_from_slice(&0u32.to_be_bytes());
        let mvex = make_box(b"mvex", &full_box(b"trex", 0, &trex));

        let mut moov = full_box(b"mvhd", 0, &[0u8; 96]);
        moov.extend(trak);
        moov.extend(mvex);
        moov.extend_from_slice(pssh);

        let mut init = make_box(b"ftyp", b"iso6\x00\x00\x00\x00");
        init.extend(make_box(b"moov", &moov));
        init
    }

    #[test]
    fn test_inspect_encrypted_init() {
        let pssh = make_pssh(crate::protection::WIDEVINE_SYSTEM_ID, &[0x12, 0x10]);
        let init = make_encrypted_init(90000, &pssh);

        let info = inspect(&init).unwrap();
        assert_eq!(info.timescale, Some(90000));
        assert_eq!(info.default_kid, Some(KeyId(KID)));
        assert!(info.encrypted);
        assert_eq!(info.pssh.len(), 1);
        assert_eq!(info.pssh[0].system_id, crate::protection::WIDEVINE_SYSTEM_ID);
        assert_eq!(info.pssh[0].data, vec![0x12, 0x10]);
        assert_eq!(info.pssh[0].raw, pssh);
        assert_eq!(info.track_defaults[0].default_sample_duration, 1000);
    }

    #[test]
    fn test_missing_moov_or_trak() {
        let init = make_box(b"ftyp", b"iso6");
        assert!(matches!(inspect(&init), Err(TsuzuriError::MissingBox("moov"))));

        let mut init = make_box(b"ftyp", b"iso6");
        init.extend(make_box(b"moov", &full_box(b"mvhd", 0, &[0u8; 96])));
        assert!(matches!(inspect(&init), Err(TsuzuriError::MissingBox("trak"))));
    }

    #[test]
    fn test_strip_protection() {
        let pssh = make_pssh(crate::protection::WIDEVINE_SYSTEM_ID, &[1, 2, 3]);
        let init = make_encrypted_init(1000, &pssh);

        let rewritten = rewrite(
            &init,
            RewriteOptions {
                strip_protection: true,
                remove_edit_lists: false,
            },
        )
        .unwrap();

        let boxes = Mp4Box::parse_all(&rewritten).unwrap();
        let moov = find_moov(&boxes).unwrap();
        assert!(moov.descendants(b"pssh").is_empty());
        assert!(moov.descendants(b"sinf").is_empty());
        assert!(moov.descendants(b"encv").is_empty());
        assert!(moov.descendants(b"edts").len() == 1);

        let stsd = moov
            .find_path(&[b"trak", b"mdia", b"minf", b"stbl", b"stsd"])
            .unwrap();
        let avc1 = moov.descendants(b"avc1");
        assert_eq!(avc1.len(), 1);
        assert!(avc1[0].child(b"avcC").is_some());
        assert_eq!(stsd.children.len(), 1);

        let info = inspect(&rewritten).unwrap();
        assert!(!info.encrypted);
        assert!(info.pssh.is_empty());
        assert_eq!(info.timescale, Some(1000));
    }

    #[test]
    fn test_remove_edit_lists_only_when_asked() {
        let init = make_encrypted_init(1000, &[]);

        let kept = rewrite(&init, RewriteOptions::default()).unwrap();
        assert_eq!(kept, init);

        let removed = rewrite(
            &init,
            RewriteOptions {
                strip_protection: false,
                remove_edit_lists: true,
            },
        )
        .unwrap();
        let boxes = Mp4Box::parse_all(&removed).unwrap();
        assert!(find_moov(&boxes).unwrap().descendants(b"edts").is_empty());
        assert_eq!(removed.len(), init.len() - 8 - 8 - 20);
    }
}
