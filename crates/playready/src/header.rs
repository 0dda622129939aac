//! The `WRMHEADER` XML carried in a PlayReady Object.

use base64::{engine::general_purpose::STANDARD, Engine};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use quick_xml::{events::Event, Reader};

use crate::error::{PlayReadyError, PlayReadyResult};
use crate::guid_swap;

const RIGHTS_MANAGEMENT_RECORD: u16 = 0x0001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayReadyHeader {
    xml: String,
}

impl PlayReadyHeader {
    /// Accepts a full `pssh` box, a PlayReady Object, or a bare UTF-16LE `WRMHEADER`.
    pub fn from_init_data(data: &[u8]) -> PlayReadyResult<Self> {
        let pro = if data.len() >= 32 && &data[4..8] == b"pssh" {
            pssh_payload(data)?
        } else {
            data
        };

        if pro.starts_with(b"<\0") {
            return Self::from_xml(decode_utf16(pro)?);
        }
        Self::from_object(pro)
    }

    /// A version 4.0 header announcing a single key id (big endian bytes).
    pub fn from_key_id(kid: &[u8; 16]) -> Self {
        let kid = STANDARD.encode(guid_swap(kid));
        Self {
            xml: format!(
                concat!(
                    r#"<WRMHEADER xmlns="http://schemas.microsoft.com/DRM/2007/03/PlayReadyHeader" version="4.0.0.0">"#,
                    "<DATA><PROTECTINFO><KEYLEN>16</KEYLEN><ALGID>AESCTR</ALGID></PROTECTINFO>",
                    "<KID>{}</KID></DATA></WRMHEADER>"
                ),
                kid
            ),
        }
    }

    fn from_object(pro: &[u8]) -> PlayReadyResult<Self> {
        let invalid = |reason: &str| PlayReadyError::InvalidHeader(reason.to_string());
        if pro.len() < 6 {
            return Err(invalid("PlayReady Object is truncated"));
        }
        let length = LittleEndian::read_u32(&pro[0..4]) as usize;
        if length > pro.len() {
            return Err(invalid("PlayReady Object length exceeds data"));
        }
        let count = LittleEndian::read_u16(&pro[4..6]);

        let mut offset = 6;
        for _ in 0..count {
            if offset + 4 > length {
                return Err(invalid("PlayReady Object record is truncated"));
            }
            let record_type = LittleEndian::read_u16(&pro[offset..offset + 2]);
            let record_length = LittleEndian::read_u16(&pro[offset + 2..offset + 4]) as usize;
            let start = offset + 4;
            let end = start + record_length;
            if end > length {
                return Err(invalid("PlayReady Object record is truncated"));
            }
            if record_type == RIGHTS_MANAGEMENT_RECORD {
                return Self::from_xml(decode_utf16(&pro[start..end])?);
            }
            offset = end;
        }

        Err(invalid("PlayReady Object has no rights management record"))
    }

    pub fn from_xml(xml: String) -> PlayReadyResult<Self> {
        if !xml.contains("<WRMHEADER") {
            return Err(PlayReadyError::InvalidHeader(
                "missing WRMHEADER element".to_string(),
            ));
        }
        Ok(Self { xml })
    }

    pub fn as_xml(&self) -> &str {
        &self.xml
    }

    /// Key ids declared by the header, in big endian byte order.
    ///
    /// Handles both `<KID>base64</KID>` (4.0) and `<KID VALUE="base64"/>` (4.1+).
    pub fn key_ids(&self) -> PlayReadyResult<Vec<[u8; 16]>> {
        let mut reader = Reader::from_str(&self.xml);
        let mut key_ids = Vec::new();
        let mut in_kid = false;

        loop {
            match reader.read_event()? {
                Event::Start(e) if e.local_name().as_ref() == b"KID" => {
                    in_kid = true;
                    push_value_attribute(&e, &mut key_ids)?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"KID" => {
                    push_value_attribute(&e, &mut key_ids)?;
                }
                Event::Text(text) if in_kid => {
                    push_kid(&text.unescape()?, &mut key_ids)?;
                }
                Event::End(e) if e.local_name().as_ref() == b"KID" => in_kid = false,
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(key_ids)
    }
}

fn push_value_attribute(
    element: &quick_xml::events::BytesStart,
    key_ids: &mut Vec<[u8; 16]>,
) -> PlayReadyResult<()> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        if attribute.key.local_name().as_ref() == b"VALUE" {
            push_kid(&attribute.unescape_value()?, key_ids)?;
        }
    }
    Ok(())
}

fn push_kid(value: &str, key_ids: &mut Vec<[u8; 16]>) -> PlayReadyResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(());
    }
    let bytes = STANDARD.decode(value)?;
    let kid: [u8; 16] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| PlayReadyError::InvalidHeader(format!("KID {value} is not 16 bytes")))?;
    let kid = guid_swap(&kid);
    if !key_ids.contains(&kid) {
        key_ids.push(kid);
    }
    Ok(())
}

fn pssh_payload(data: &[u8]) -> PlayReadyResult<&[u8]> {
    let invalid = |reason: &str| PlayReadyError::InvalidHeader(reason.to_string());
    let size = (BigEndian::read_u32(&data[0..4]) as usize).min(data.len());
    let version = data[8];
    let mut offset = 28;
    if version > 0 {
        if size < offset + 4 {
            return Err(invalid("pssh box is truncated"));
        }
        let kid_count = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
        offset += 4 + kid_count * 16;
    }
    if size < offset + 4 {
        return Err(invalid("pssh box is truncated"));
    }
    let data_size = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
    offset += 4;
    data.get(offset..offset + data_size)
        .ok_or_else(|| invalid("pssh data exceeds the box"))
}

fn decode_utf16(data: &[u8]) -> PlayReadyResult<String> {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units)
        .map(|s| s.trim_end_matches('\0').to_string())
        .map_err(|e| PlayReadyError::InvalidHeader(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_playready_object, build_pssh_box};

    const KID: [u8; 16] = [
        0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80, 0x90, 0xa0, 0xb0, 0xc0, 0xd0, 0xe0, 0xf0,
        0x01,
    ];

    #[test]
    fn test_header_from_key_id() {
        let header = PlayReadyHeader::from_key_id(&KID);
        assert!(header.as_xml().contains("<KID>QDAgEGBQgHCQoLDA0ODwAQ==</KID>"));
        assert_eq!(header.key_ids().unwrap(), vec![KID]);
    }

    #[test]
    fn test_header_from_pssh_box() {
        let header = PlayReadyHeader::from_key_id(&KID);
        let pssh = build_pssh_box(&build_playready_object(header.as_xml()));

        let parsed = PlayReadyHeader::from_init_data(&pssh).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.key_ids().unwrap(), vec![KID]);
    }

    #[test]
    fn test_header_v41_kid_attribute() {
        let xml = r#"<WRMHEADER version="4.1.0.0"><DATA><PROTECTINFO><KID ALGID="AESCTR" VALUE="QDAgEGBQgHCQoLDA0ODwAQ=="></KID></PROTECTINFO></DATA></WRMHEADER>"#;
        let header = PlayReadyHeader::from_xml(xml.to_string()).unwrap();
        assert_eq!(header.key_ids().unwrap(), vec![KID]);
    }

    #[test]
    fn test_object_without_header() {
        let mut pro = Vec::new();
        pro.extend_from_slice(&10u32.to_le_bytes());
        pro.extend_from_slice(&1u16.to_le_bytes());
        pro.extend_from_slice(&3u16.to_le_bytes());
        pro.extend_from_slice(&0u16.to_le_bytes());
        assert!(matches!(
            PlayReadyHeader::from_init_data(&pro),
            Err(PlayReadyError::InvalidHeader(_))
        ));
    }
}
