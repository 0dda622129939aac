use std::io::{Cursor, Read};
use std::ops::Deref;

use anyhow::bail;
use byteorder::{BigEndian, ReadBytesExt};
use prost::Message;

use crate::base64::base64_decode;
use crate::constants::WIDEVINE_SYSTEM_ID;
use crate::protocol::WidevinePsshData;

/// A full `pssh` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub system_id: [u8; 16],
    pub key_ids: Vec<[u8; 16]>,
    pub data: Vec<u8>,
}

impl PsshBox {
    pub fn parse(input: &[u8]) -> anyhow::Result<Self> {
        let mut buf = Cursor::new(input);
        let size = buf.read_u32::<BigEndian>()? as usize;
        let mut kind = [0u8; 4];
        buf.read_exact(&mut kind)?;
        if &kind != b"pssh" {
            bail!("invalid pssh header");
        }
        if size < 32 || size > input.len() {
            bail!("invalid pssh box size {size}");
        }

        let version = buf.read_u8()?;
        buf.read_u24::<BigEndian>()?; // flags

        let mut system_id = [0u8; 16];
        buf.read_exact(&mut system_id)?;

        let mut key_ids = Vec::new();
        if version > 0 {
            let kid_count = buf.read_u32::<BigEndian>()?;
            for _ in 0..kid_count {
                let mut kid = [0u8; 16];
                buf.read_exact(&mut kid)?;
                key_ids.push(kid);
            }
        }

        let data_length = buf.read_u32::<BigEndian>()? as usize;
        let mut data = vec![0u8; data_length];
        buf.read_exact(&mut data)?;

        Ok(Self {
            system_id,
            key_ids,
            data,
        })
    }

    /// Serializes a version 0 box around `data`.
    pub fn build(system_id: &[u8; 16], data: &[u8]) -> Vec<u8> {
        let size = 32 + data.len();
        let mut output = Vec::with_capacity(size);
        output.extend_from_slice(&(size as u32).to_be_bytes());
        output.extend_from_slice(b"pssh");
        output.extend_from_slice(&[0, 0, 0, 0]);
        output.extend_from_slice(system_id);
        output.extend_from_slice(&(data.len() as u32).to_be_bytes());
        output.extend_from_slice(data);
        output
    }
}

/// Widevine init data, either a complete `pssh` box or its bare payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidevineInitData(pub(crate) Vec<u8>);

impl WidevineInitData {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn from_base64<S: AsRef<str>>(input: S) -> anyhow::Result<Self> {
        Ok(Self(base64_decode(input.as_ref())?))
    }

    /// Synthesizes init data for content that only announces its key ids.
    pub fn from_key_ids(key_ids: &[[u8; 16]]) -> Self {
        let data = WidevinePsshData {
            key_ids: key_ids.iter().map(|kid| kid.to_vec()).collect(),
            ..Default::default()
        };
        Self(data.encode_to_vec())
    }

    fn is_box(&self) -> bool {
        self.len() >= 32 && &self[4..8] == b"pssh"
    }

    /// The `WidevinePsshData` bytes carried in the license request.
    pub fn payload(&self) -> anyhow::Result<Vec<u8>> {
        if !self.is_box() {
            return Ok(self.0.clone());
        }

        let pssh = PsshBox::parse(&self.0)?;
        if &pssh.system_id != WIDEVINE_SYSTEM_ID {
            bail!(
                "pssh box belongs to system {}, not Widevine",
                hex::encode(pssh.system_id)
            );
        }
        Ok(pssh.data)
    }

    pub fn get_pssh(&self) -> anyhow::Result<WidevinePsshData> {
        Ok(WidevinePsshData::decode(self.payload()?.as_slice())?)
    }

    /// Key ids listed in the init data, from the box header and from the payload.
    pub fn key_ids(&self) -> anyhow::Result<Vec<[u8; 16]>> {
        let mut key_ids = if self.is_box() {
            PsshBox::parse(&self.0)?.key_ids
        } else {
            Vec::new()
        };
        for kid in self.get_pssh()?.key_ids {
            if let Ok(kid) = <[u8; 16]>::try_from(kid.as_slice()) {
                if !key_ids.contains(&kid) {
                    key_ids.push(kid);
                }
            }
        }
        Ok(key_ids)
    }
}

impl Deref for WidevineInitData {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
