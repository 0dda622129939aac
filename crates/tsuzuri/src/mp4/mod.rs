//! Minimal ISO-BMFF support: locating boxes in raw bytes, and a mutable box
//! tree for the few boxes that have to be rewritten.

pub mod decrypt;
pub mod fragment;
pub mod init;
pub mod sidx;

use crate::{TsuzuriError, TsuzuriResult};

/// Position of one box inside a larger buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoxView {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) fourcc: [u8; 4],
    pub(crate) body_start: usize,
}

/// `(size, fourcc, header length)` of the box starting at `data[0]`.
///
/// A size of 1 is followed by a 64-bit size, and 0 runs to the end of `data`.
pub(crate) fn read_box_header(data: &[u8]) -> Option<(usize, [u8; 4], usize)> {
    if data.len() < 8 {
        return None;
    }

    let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
    let fourcc: [u8; 4] = [data[4], data[5], data[6], data[7]];

    if size == 1 {
        if data.len() < 16 {
            return None;
        }
        let ext_size = u64::from_be_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]);
        Some((usize::try_from(ext_size).ok()?, fourcc, 16))
    } else if size == 0 {
        Some((data.len(), fourcc, 8))
    } else {
        Some((size as usize, fourcc, 8))
    }
}

/// The box at `offset`, if it fits before `end`.
pub(crate) fn box_at(data: &[u8], offset: usize, end: usize) -> Option<BoxView> {
    if offset >= end || end > data.len() {
        return None;
    }

    let (size, fourcc, header_size) = read_box_header(&data[offset..end])?;
    if size < header_size || offset.checked_add(size)? > end {
        return None;
    }

    Some(BoxView {
        start: offset,
        end: offset + size,
        fourcc,
        body_start: offset + header_size,
    })
}

/// Iterates the sibling boxes inside `[start..end)`, stopping at the first malformed header.
pub(crate) fn boxes_in(data: &[u8], start: usize, end: usize) -> impl Iterator<Item = BoxView> + '_ {
    let mut offset = start;
    std::iter::from_fn(move || {
        let parsed = box_at(data, offset, end)?;
        offset = parsed.end;
        Some(parsed)
    })
}

/// First box of kind `target` among the siblings in `[start..end)`.
pub(crate) fn find_first_box(data: &[u8], start: usize, end: usize, target: [u8; 4]) -> Option<BoxView> {
    boxes_in(data, start, end).find(|b| b.fourcc == target)
}

pub(crate) fn fourcc_str(fourcc: &[u8; 4]) -> String {
    String::from_utf8_lossy(fourcc).into_owned()
}

/// Big-endian cursor over a box body.
pub(crate) struct BoxReader<'a> {
    kind: &'static str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> BoxReader<'a> {
    pub(crate) fn new(kind: &'static str, data: &'a [u8]) -> Self {
        Self { kind, data, pos: 0 }
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> TsuzuriResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| TsuzuriError::malformed(self.kind, "unexpected end of box"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> TsuzuriResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub(crate) fn read_u16(&mut self) -> TsuzuriResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_u32(&mut self) -> TsuzuriResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_u64(&mut self) -> TsuzuriResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Reads the `(version, flags)` header of a full box.
    pub(crate) fn read_full_box_header(&mut self) -> TsuzuriResult<(u8, u32)> {
        let value = self.read_u32()?;
        Ok(((value >> 24) as u8, value & 0x00ff_ffff))
    }

    pub(crate) fn skip(&mut self, len: usize) -> TsuzuriResult<()> {
        self.read_bytes(len).map(|_| ())
    }
}

/// A box with its body split into leading bytes and child boxes.
///
/// `data` holds the bytes preceding the children (full box headers, sample
/// entry fields), or the whole body for boxes that are not descended into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Box {
    pub kind: [u8; 4],
    pub data: Vec<u8>,
    pub children: Vec<Mp4Box>,
}

impl Mp4Box {
    pub fn leaf(kind: [u8; 4], data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
            children: Vec::new(),
        }
    }

    pub fn container(kind: [u8; 4], children: Vec<Mp4Box>) -> Self {
        Self {
            kind,
            data: Vec::new(),
            children,
        }
    }

    /// Parses every top-level box of `data`.
    pub fn parse_all(data: &[u8]) -> TsuzuriResult<Vec<Mp4Box>> {
        let mut boxes = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let view = box_at(data, offset, data.len())
                .ok_or_else(|| TsuzuriError::malformed("file", format!("truncated box at {offset}")))?;
            boxes.push(Self::parse_view(data, view)?);
            offset = view.end;
        }
        Ok(boxes)
    }

    fn parse_view(data: &[u8], view: BoxView) -> TsuzuriResult<Self> {
        let body = &data[view.body_start..view.end];
        let Some(offset) = children_offset(&view.fourcc, body) else {
            return Ok(Self::leaf(view.fourcc, body));
        };

        Ok(Self {
            kind: view.fourcc,
            data: body[..offset].to_vec(),
            children: Self::parse_all(&body[offset..]).map_err(|e| match e {
                TsuzuriError::MalformedBox { reason, .. } => {
                    TsuzuriError::malformed(fourcc_str(&view.fourcc), reason)
                }
                e => e,
            })?,
        })
    }

    fn body_size(&self) -> u64 {
        self.data.len() as u64 + self.children.iter().map(Mp4Box::size).sum::<u64>()
    }

    /// Encoded size including the header.
    pub fn size(&self) -> u64 {
        let body = self.body_size();
        if body + 8 > u32::MAX as u64 {
            body + 16
        } else {
            body + 8
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let size = self.size();
        if size > u32::MAX as u64 {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(&self.kind);
            out.extend_from_slice(&size.to_be_bytes());
        } else {
            out.extend_from_slice(&(size as u32).to_be_bytes());
            out.extend_from_slice(&self.kind);
        }
        out.extend_from_slice(&self.data);
        for child in &self.children {
            child.write_to(out);
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        self.write_to(&mut out);
        out
    }

    pub fn encode_all(boxes: &[Mp4Box]) -> Vec<u8> {
        let mut out = Vec::new();
        for b in boxes {
            b.write_to(&mut out);
        }
        out
    }

    pub fn child(&self, kind: &[u8; 4]) -> Option<&Mp4Box> {
        self.children.iter().find(|c| &c.kind == kind)
    }

    /// Follows `path` through the first matching child at each level.
    pub fn find_path(&self, path: &[&[u8; 4]]) -> Option<&Mp4Box> {
        path.iter().try_fold(self, |current, kind| current.child(kind))
    }

    /// Every descendant (depth first, self excluded) of the given kind.
    pub fn descendants<'a>(&'a self, kind: &[u8; 4]) -> Vec<&'a Mp4Box> {
        let mut found = Vec::new();
        self.collect_descendants(kind, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, kind: &[u8; 4], found: &mut Vec<&'a Mp4Box>) {
        for child in &self.children {
            if &child.kind == kind {
                found.push(child);
            }
            child.collect_descendants(kind, found);
        }
    }

    /// Calls `f` on every descendant, parents before children.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Mp4Box)) {
        for child in &mut self.children {
            f(child);
            child.visit_mut(f);
        }
    }
}

/// Where the child boxes start inside the body of a box we descend into.
fn children_offset(kind: &[u8; 4], body: &[u8]) -> Option<usize> {
    let offset = match kind {
        b"moov" | b"trak" | b"mdia" | b"minf" | b"stbl" | b"dinf" | b"edts" | b"mvex"
        | b"moof" | b"traf" | b"mfra" | b"sinf" | b"schi" => 0,
        // version + flags + entry_count
        b"stsd" => 8,
        // SampleEntry (8) + VisualSampleEntry (70)
        b"encv" | b"avc1" | b"avc3" | b"hvc1" | b"hev1" | b"av01" | b"vp09" => 78,
        // SampleEntry (8) + AudioSampleEntry, whose size depends on the QuickTime version
        b"enca" | b"mp4a" | b"ac-3" | b"ec-3" | b"Opus" | b"fLaC" => match body.get(8..10).map(|v| u16::from_be_bytes([v[0], v[1]])) {
            Some(0) => 28,
            Some(1) => 44,
            Some(2) => 64,
            _ => return None,
        },
        _ => return None,
    };

    (body.len() >= offset).then_some(offset)
}
