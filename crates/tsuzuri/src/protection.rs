use std::{fmt, str::FromStr};

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::{mp4::init::InitSegmentInfo, TsuzuriError, TsuzuriResult};

pub const WIDEVINE_SYSTEM_ID: [u8; 16] = [
    0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21, 0xed,
];
pub const PLAYREADY_SYSTEM_ID: [u8; 16] = [
    0x9a, 0x04, 0xf0, 0x79, 0x98, 0x40, 0x42, 0x86, 0xab, 0x92, 0xe6, 0x5b, 0xe0, 0x88, 0x5f, 0x95,
];

pub const MP4_PROTECTION_SCHEME_ID_URI: &str = "urn:mpeg:dash:mp4protection:2011";
pub const WIDEVINE_SCHEME_ID_URI: &str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";
pub const PLAYREADY_SCHEME_ID_URI: &str = "urn:uuid:9a04f079-9840-4286-ab92-e65be0885f95";
const PLAYREADY_HLS_KEYFORMAT: &str = "com.microsoft.playready";

/// A 16-byte content key identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub [u8; 16]);

impl KeyId {
    pub fn from_slice(bytes: &[u8]) -> TsuzuriResult<Self> {
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| TsuzuriError::InvalidKeyId(hex::encode(bytes)))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Accepts both `0123456789abcdef0123456789abcdef` and the UUID form.
impl FromStr for KeyId {
    type Err = TsuzuriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.trim().chars().filter(|c| *c != '-').collect();
        let bytes = hex::decode(&digits).map_err(|_| TsuzuriError::InvalidKeyId(s.to_string()))?;
        Self::from_slice(&bytes).map_err(|_| TsuzuriError::InvalidKeyId(s.to_string()))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrmSystem {
    Widevine,
    PlayReady,
}

impl DrmSystem {
    pub fn system_id(&self) -> [u8; 16] {
        match self {
            DrmSystem::Widevine => WIDEVINE_SYSTEM_ID,
            DrmSystem::PlayReady => PLAYREADY_SYSTEM_ID,
        }
    }

    pub fn from_system_id(system_id: &[u8; 16]) -> Option<Self> {
        match *system_id {
            WIDEVINE_SYSTEM_ID => Some(DrmSystem::Widevine),
            PLAYREADY_SYSTEM_ID => Some(DrmSystem::PlayReady),
            _ => None,
        }
    }

    /// Matches a DASH `schemeIdUri` or an HLS `KEYFORMAT`.
    pub fn from_scheme_id_uri(scheme: &str) -> Option<Self> {
        let scheme = scheme.trim().to_ascii_lowercase();
        match scheme.as_str() {
            WIDEVINE_SCHEME_ID_URI => Some(DrmSystem::Widevine),
            PLAYREADY_SCHEME_ID_URI | PLAYREADY_HLS_KEYFORMAT => Some(DrmSystem::PlayReady),
            _ => None,
        }
    }
}

impl fmt::Display for DrmSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrmSystem::Widevine => f.write_str("Widevine"),
            DrmSystem::PlayReady => f.write_str("PlayReady"),
        }
    }
}

/// A `ContentProtection` element, or an HLS `EXT-X-KEY` carrying a DRM keyformat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentProtectionRecord {
    pub scheme_id_uri: String,
    pub value: Option<String>,
    pub default_kid: Option<String>,
    /// Base64 encoded `pssh` box.
    pub pssh: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPssh {
    pub system: DrmSystem,
    pub data: Vec<u8>,
}

/// DRM signaling of one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionInfo {
    pub key_id: Option<KeyId>,
    pub pssh: Vec<SystemPssh>,
}

impl ProtectionInfo {
    pub fn pssh_for(&self, system: DrmSystem) -> Option<&[u8]> {
        self.pssh
            .iter()
            .find(|p| p.system == system)
            .map(|p| p.data.as_slice())
    }

    fn is_empty(&self) -> bool {
        self.key_id.is_none() && self.pssh.is_empty()
    }

    fn set_key_id(&mut self, key_id: KeyId) -> TsuzuriResult<()> {
        match self.key_id {
            Some(expected) if expected != key_id => Err(TsuzuriError::KeyIdMismatch {
                expected,
                actual: key_id,
            }),
            _ => {
                self.key_id = Some(key_id);
                Ok(())
            }
        }
    }

    fn add_pssh(&mut self, system: DrmSystem, data: Vec<u8>) {
        if self.pssh_for(system).is_none() {
            self.pssh.push(SystemPssh { system, data });
        }
    }
}

/// Collects DRM signaling from manifest `ContentProtection` records.
///
/// Streams without any recognised record are clear, which is not an error.
pub fn extract_from_manifest(records: &[ContentProtectionRecord]) -> TsuzuriResult<Option<ProtectionInfo>> {
    let mut info = ProtectionInfo::default();

    for record in records {
        let scheme = record.scheme_id_uri.trim().to_ascii_lowercase();
        let system = DrmSystem::from_scheme_id_uri(&scheme);
        if system.is_none() && scheme != MP4_PROTECTION_SCHEME_ID_URI {
            tracing::debug!("Ignoring unknown content protection scheme {scheme}");
            continue;
        }

        if let Some(kid) = &record.default_kid {
            info.set_key_id(kid.parse()?)?;
        }

        if let (Some(system), Some(pssh)) = (system, &record.pssh) {
            let data = STANDARD.decode(pssh.trim())?;
            info.add_pssh(system, data);
        }
    }

    Ok((!info.is_empty()).then_some(info))
}

/// Collects DRM signaling from the `pssh` and `tenc` boxes of an initialization segment.
pub fn extract_from_init(init: &InitSegmentInfo) -> Option<ProtectionInfo> {
    let mut info = ProtectionInfo {
        key_id: init.default_kid,
        pssh: Vec::new(),
    };

    for pssh in &init.pssh {
        match DrmSystem::from_system_id(&pssh.system_id) {
            Some(system) => info.add_pssh(system, pssh.raw.clone()),
            None => tracing::debug!("Ignoring pssh of unknown system {}", hex::encode(pssh.system_id)),
        }
    }

    (!info.is_empty()).then_some(info)
}

/// Combines both sources. The manifest wins for anything present in both, and
/// the key ids, when both are known, must agree.
pub fn merge(
    manifest: Option<ProtectionInfo>,
    init: Option<ProtectionInfo>,
) -> TsuzuriResult<Option<ProtectionInfo>> {
    let (mut merged, init) = match (manifest, init) {
        (None, None) => return Ok(None),
        (Some(info), None) | (None, Some(info)) => return Ok(Some(info)),
        (Some(manifest), Some(init)) => (manifest, init),
    };

    if let Some(key_id) = init.key_id {
        merged.set_key_id(key_id)?;
    }
    for pssh in init.pssh {
        merged.add_pssh(pssh.system, pssh.data);
    }

    Ok(Some(merged))
}
