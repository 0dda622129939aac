//! XMR licenses.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{PlayReadyError, PlayReadyResult};
use crate::guid_swap;

pub const XMR_MAGIC: &[u8; 4] = b"XMR\0";

pub const OBJECT_OUTER_CONTAINER: u16 = 0x0001;
pub const OBJECT_GLOBAL_POLICY_CONTAINER: u16 = 0x0002;
pub const OBJECT_KEY_MATERIAL_CONTAINER: u16 = 0x0009;
pub const OBJECT_CONTENT_KEY: u16 = 0x000a;
pub const OBJECT_SIGNATURE: u16 = 0x000b;

pub const FLAG_CONTAINER: u16 = 0x0002;

pub const CIPHER_ECC_256: u16 = 0x0003;

const HEADER_LEN: usize = 24;
const OBJECT_HEADER_LEN: usize = 8;

/// A wrapped content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKeyObject {
    /// Big endian byte order.
    pub key_id: [u8; 16],
    pub key_type: u16,
    pub cipher_type: u16,
    pub encrypted_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseSignature {
    pub signature_type: u16,
    pub signature: Vec<u8>,
    /// Length of the license prefix the signature covers.
    pub signed_len: usize,
}

#[derive(Debug, Clone)]
pub struct XmrLicense {
    raw: Vec<u8>,
    pub version: u32,
    pub rights_id: [u8; 16],
    pub content_keys: Vec<ContentKeyObject>,
    pub signature: Option<LicenseSignature>,
}

impl XmrLicense {
    pub fn parse(raw: Vec<u8>) -> PlayReadyResult<Self> {
        if raw.len() < HEADER_LEN || &raw[0..4] != XMR_MAGIC {
            return Err(invalid("missing XMR header"));
        }
        let mut header = Cursor::new(&raw[4..HEADER_LEN]);
        let version = header.read_u32::<BigEndian>()?;
        let mut rights_id = [0u8; 16];
        header.read_exact(&mut rights_id)?;

        let mut license = Self {
            raw: Vec::new(),
            version,
            rights_id,
            content_keys: Vec::new(),
            signature: None,
        };
        license.parse_objects(&raw, HEADER_LEN, raw.len())?;
        license.raw = raw;

        Ok(license)
    }

    fn parse_objects(&mut self, data: &[u8], mut offset: usize, end: usize) -> PlayReadyResult<()> {
        while offset + OBJECT_HEADER_LEN <= end {
            let mut header = Cursor::new(&data[offset..offset + OBJECT_HEADER_LEN]);
            let flags = header.read_u16::<BigEndian>()?;
            let object_type = header.read_u16::<BigEndian>()?;
            let length = header.read_u32::<BigEndian>()? as usize;
            if length < OBJECT_HEADER_LEN || offset + length > end {
                return Err(invalid(format!(
                    "object {object_type:#06x} at {offset} has invalid length {length}"
                )));
            }

            let body = &data[offset + OBJECT_HEADER_LEN..offset + length];
            if flags & FLAG_CONTAINER != 0 {
                self.parse_objects(data, offset + OBJECT_HEADER_LEN, offset + length)?;
            } else {
                match object_type {
                    OBJECT_CONTENT_KEY => self.content_keys.push(parse_content_key(body)?),
                    OBJECT_SIGNATURE => {
                        let mut reader = Cursor::new(body);
                        let signature_type = reader.read_u16::<BigEndian>()?;
                        let signature_len = reader.read_u16::<BigEndian>()? as usize;
                        let mut signature = vec![0u8; signature_len];
                        reader.read_exact(&mut signature)?;
                        self.signature = Some(LicenseSignature {
                            signature_type,
                            signature,
                            signed_len: offset,
                        });
                    }
                    _ => log::trace!("Skipping XMR object {object_type:#06x}"),
                }
            }
            offset += length;
        }
        Ok(())
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The bytes covered by the license signature.
    pub fn signed_data(&self) -> Option<&[u8]> {
        self.signature.as_ref().map(|s| &self.raw[..s.signed_len])
    }
}

fn parse_content_key(body: &[u8]) -> PlayReadyResult<ContentKeyObject> {
    let mut reader = Cursor::new(body);
    let mut key_id = [0u8; 16];
    reader.read_exact(&mut key_id)?;
    let key_type = reader.read_u16::<BigEndian>()?;
    let cipher_type = reader.read_u16::<BigEndian>()?;
    let key_len = reader.read_u16::<BigEndian>()? as usize;
    let mut encrypted_key = vec![0u8; key_len];
    reader.read_exact(&mut encrypted_key)?;

    Ok(ContentKeyObject {
        key_id: guid_swap(&key_id),
        key_type,
        cipher_type,
        encrypted_key,
    })
}

fn invalid(reason: impl Into<String>) -> PlayReadyError {
    PlayReadyError::InvalidLicense(reason.into())
}
