//! Binary device certificates (`BCert`) and their chains.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{PlayReadyError, PlayReadyResult};

pub const ATTRIBUTE_BASIC_INFO: u16 = 0x0001;
pub const ATTRIBUTE_KEY: u16 = 0x0006;
pub const ATTRIBUTE_SIGNATURE: u16 = 0x0008;

pub const KEY_USAGE_SIGN: u32 = 1;
pub const KEY_USAGE_ENCRYPT_KEY: u32 = 2;

const CHAIN_HEADER_LEN: usize = 20;
const CERT_HEADER_LEN: usize = 16;
const ATTRIBUTE_HEADER_LEN: usize = 8;

/// A public key listed in a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateKey {
    pub key_type: u16,
    pub public_key: Vec<u8>,
    pub usages: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Certificate {
    pub version: u32,
    pub keys: Vec<CertificateKey>,
}

impl Certificate {
    pub fn has_key(&self, public_key: &[u8]) -> bool {
        self.keys.iter().any(|k| k.public_key == public_key)
    }

    pub fn key_with_usage(&self, usage: u32) -> Option<&CertificateKey> {
        self.keys.iter().find(|k| k.usages.contains(&usage))
    }
}

/// A `CHAI` certificate chain, leaf certificate first.
#[derive(Debug, Clone)]
pub struct CertificateChain {
    raw: Vec<u8>,
    certificates: Vec<Certificate>,
}

impl CertificateChain {
    pub fn parse(raw: Vec<u8>) -> PlayReadyResult<Self> {
        let invalid = |reason: String| PlayReadyError::InvalidCertificateChain(reason);

        if raw.len() < CHAIN_HEADER_LEN || &raw[0..4] != b"CHAI" {
            return Err(invalid("missing CHAI header".to_string()));
        }
        let mut header = Cursor::new(&raw[4..CHAIN_HEADER_LEN]);
        let _version = header.read_u32::<BigEndian>()?;
        let total_length = header.read_u32::<BigEndian>()? as usize;
        let _flags = header.read_u32::<BigEndian>()?;
        let count = header.read_u32::<BigEndian>()?;
        if total_length > raw.len() {
            return Err(invalid(format!(
                "chain declares {total_length} bytes but only {} are present",
                raw.len()
            )));
        }

        let mut certificates = Vec::with_capacity(count as usize);
        let mut offset = CHAIN_HEADER_LEN;
        for index in 0..count {
            let (certificate, length) = parse_certificate(&raw[offset..total_length])
                .map_err(|e| invalid(format!("certificate {index}: {e}")))?;
            certificates.push(certificate);
            offset += length;
        }
        if certificates.is_empty() {
            return Err(invalid("chain contains no certificate".to_string()));
        }

        Ok(Self { raw, certificates })
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// The device certificate.
    pub fn leaf(&self) -> &Certificate {
        // `parse` guarantees at least one certificate
        &self.certificates[0]
    }
}

fn parse_certificate(data: &[u8]) -> Result<(Certificate, usize), String> {
    if data.len() < CERT_HEADER_LEN || &data[0..4] != b"CERT" {
        return Err("missing CERT header".to_string());
    }
    let mut header = Cursor::new(&data[4..CERT_HEADER_LEN]);
    let version = header.read_u32::<BigEndian>().map_err(|e| e.to_string())?;
    let total_length = header.read_u32::<BigEndian>().map_err(|e| e.to_string())? as usize;
    if total_length < CERT_HEADER_LEN || total_length > data.len() {
        return Err(format!("invalid certificate length {total_length}"));
    }

    let mut keys = Vec::new();
    let mut offset = CERT_HEADER_LEN;
    while offset + ATTRIBUTE_HEADER_LEN <= total_length {
        let mut attribute = Cursor::new(&data[offset..total_length]);
        let _flags = attribute.read_u16::<BigEndian>().map_err(|e| e.to_string())?;
        let tag = attribute.read_u16::<BigEndian>().map_err(|e| e.to_string())?;
        let length = attribute.read_u32::<BigEndian>().map_err(|e| e.to_string())? as usize;
        if length < ATTRIBUTE_HEADER_LEN || offset + length > total_length {
            return Err(format!("attribute {tag:#06x} has invalid length {length}"));
        }

        if tag == ATTRIBUTE_KEY {
            keys = parse_keys(&data[offset + ATTRIBUTE_HEADER_LEN..offset + length])
                .map_err(|e| format!("key attribute: {e}"))?;
        }
        offset += length;
    }

    Ok((Certificate { version, keys }, total_length))
}

fn parse_keys(body: &[u8]) -> std::io::Result<Vec<CertificateKey>> {
    let mut reader = Cursor::new(body);
    let count = reader.read_u32::<BigEndian>()?;
    let mut keys = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key_type = reader.read_u16::<BigEndian>()?;
        let bits = reader.read_u16::<BigEndian>()?;
        let _flags = reader.read_u32::<BigEndian>()?;
        let mut public_key = vec![0u8; bits as usize / 8];
        reader.read_exact(&mut public_key)?;

        let usage_count = reader.read_u32::<BigEndian>()?;
        let mut usages = Vec::with_capacity(usage_count as usize);
        for _ in 0..usage_count {
            usages.push(reader.read_u32::<BigEndian>()?);
        }

        keys.push(CertificateKey {
            key_type,
            public_key,
            usages,
        });
    }
    Ok(keys)
}
