//! Content key acquisition.
//!
//! Both DRM systems run the same exchange:
//! `Idle -> BuildRequest -> Sign -> Send -> ParseResponse -> ExtractKey -> Done | Failed`.

pub mod playready;
pub mod transport;
pub mod widevine;

use std::{fmt, str::FromStr, sync::Arc};

pub use transport::{HttpLicenseTransport, LicenseTransport, TransportError};

use crate::{
    config::DrmConfig,
    protection::{KeyId, ProtectionInfo},
    TsuzuriError, TsuzuriResult,
};

/// A 16-byte content key. All-zero keys are rejected at construction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ContentKey([u8; 16]);

impl ContentKey {
    pub fn new(key: [u8; 16]) -> TsuzuriResult<Self> {
        if key.iter().all(|b| *b == 0) {
            return Err(TsuzuriError::ZeroContentKey);
        }
        Ok(Self(key))
    }

    pub fn from_slice(key: &[u8]) -> TsuzuriResult<Self> {
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| TsuzuriError::InvalidContentKey(format!("expected 16 bytes, got {}", key.len())))?;
        Self::new(key)
    }

    pub fn from_hex(key: &str) -> TsuzuriResult<Self> {
        Self::from_slice(&hex::decode(key.trim())?)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// A content key together with the key id it decrypts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key_id: KeyId,
    pub key: ContentKey,
}

/// Parses the `kid:key` form.
impl FromStr for ResolvedKey {
    type Err = TsuzuriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key_id, key) = s
            .split_once(':')
            .ok_or_else(|| TsuzuriError::InvalidContentKey(format!("expected kid:key, got {s}")))?;
        Ok(Self {
            key_id: key_id.parse()?,
            key: ContentKey::from_hex(key)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicensePhase {
    Idle,
    BuildRequest,
    Sign,
    Send,
    ParseResponse,
    ExtractKey,
    Done,
    Failed,
}

impl fmt::Display for LicensePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            LicensePhase::Idle => "idle",
            LicensePhase::BuildRequest => "building the license request",
            LicensePhase::Sign => "signing the license request",
            LicensePhase::Send => "sending the license request",
            LicensePhase::ParseResponse => "parsing the license response",
            LicensePhase::ExtractKey => "extracting the content key",
            LicensePhase::Done => "done",
            LicensePhase::Failed => "failed",
        };
        f.write_str(phase)
    }
}

/// The message formats of one DRM system.
pub trait LicenseProtocol {
    type Response;

    fn build_request(&mut self) -> TsuzuriResult<Vec<u8>>;

    /// Systems without request signatures send the request as built.
    fn sign(&mut self, request: Vec<u8>) -> TsuzuriResult<Vec<u8>> {
        Ok(request)
    }

    fn parse_response(&mut self, response: &[u8]) -> TsuzuriResult<Self::Response>;

    fn extract_key(&mut self, response: Self::Response) -> TsuzuriResult<ResolvedKey>;
}

/// Drives a [`LicenseProtocol`] through the exchange, tagging any failure with its phase.
pub struct LicenseExchange<'a, P> {
    protocol: P,
    transport: &'a dyn LicenseTransport,
    phase: LicensePhase,
}

impl<'a, P: LicenseProtocol> LicenseExchange<'a, P> {
    pub fn new(protocol: P, transport: &'a dyn LicenseTransport) -> Self {
        Self {
            protocol,
            transport,
            phase: LicensePhase::Idle,
        }
    }

    pub fn phase(&self) -> LicensePhase {
        self.phase
    }

    fn enter(&mut self, phase: LicensePhase) {
        tracing::debug!("License exchange: {phase}");
        self.phase = phase;
    }

    pub fn run(&mut self) -> TsuzuriResult<ResolvedKey> {
        match self.drive() {
            Ok(key) => {
                self.phase = LicensePhase::Done;
                Ok(key)
            }
            Err(source) => {
                let phase = self.phase;
                self.phase = LicensePhase::Failed;
                Err(TsuzuriError::License {
                    phase,
                    source: Box::new(source),
                })
            }
        }
    }

    fn drive(&mut self) -> TsuzuriResult<ResolvedKey> {
        self.enter(LicensePhase::BuildRequest);
        let request = self.protocol.build_request()?;

        self.enter(LicensePhase::Sign);
        let request = self.protocol.sign(request)?;

        self.enter(LicensePhase::Send);
        let response = self
            .transport
            .send(&request)
            .map_err(|e| TsuzuriError::Transport(e.to_string()))?;

        self.enter(LicensePhase::ParseResponse);
        let response = self.protocol.parse_response(&response)?;

        self.enter(LicensePhase::ExtractKey);
        self.protocol.extract_key(response)
    }
}

/// Picks the content key from a license's keys: the requested key id if known,
/// otherwise the first key. All-zero keys count as absent.
pub(crate) fn select_key(
    requested: Option<KeyId>,
    keys: impl IntoIterator<Item = (KeyId, [u8; 16])>,
) -> TsuzuriResult<ResolvedKey> {
    let mut keys = keys.into_iter().filter(|(_, key)| {
        let zero = key.iter().all(|b| *b == 0);
        if zero {
            tracing::warn!("Ignoring all-zero content key in license");
        }
        !zero
    });

    let found = match requested {
        Some(kid) => keys.find(|(id, _)| *id == kid),
        None => keys.next(),
    };
    match (found, requested) {
        (Some((key_id, key)), _) => Ok(ResolvedKey {
            key_id,
            key: ContentKey::new(key)?,
        }),
        (None, Some(kid)) => Err(TsuzuriError::KeyNotFound(kid)),
        (None, None) => Err(TsuzuriError::UnknownKeyId),
    }
}

/// How content keys are obtained for a download. Exactly one path runs.
pub enum DrmResolver {
    Widevine(widevine::WidevineResolver),
    PlayReady(playready::PlayReadyResolver),
    /// A key supplied up front.
    Manual(ResolvedKey),
}

impl DrmResolver {
    /// A manual key wins, then PlayReady when its certificate chain and signing
    /// key are configured, then Widevine.
    pub fn from_config(config: &DrmConfig, transport: Arc<dyn LicenseTransport>) -> TsuzuriResult<Self> {
        if let Some(key) = &config.key {
            return Ok(Self::Manual(key.parse()?));
        }

        if let (Some(chain), Some(signing_key)) = (
            &config.playready_certificate_chain,
            &config.playready_signing_key,
        ) {
            let device = tsuzuri_playready::Device::from_files(
                chain.as_path(),
                signing_key.as_path(),
                config.playready_encryption_key.as_deref(),
            )?;
            return Ok(Self::PlayReady(playready::PlayReadyResolver::new(device, transport)));
        }

        let device = match (
            &config.widevine_device,
            &config.widevine_client_id,
            &config.widevine_private_key,
        ) {
            (Some(dir), _, _) => tsuzuri_widevine::Device::new(dir),
            (None, Some(client_id), Some(private_key)) => {
                tsuzuri_widevine::Device::from_files(client_id, private_key)
            }
            _ => {
                return Err(TsuzuriError::MissingCredentials(
                    "configure a manual key, a PlayReady certificate chain and signing key, or a Widevine device",
                ))
            }
        }
        .map_err(TsuzuriError::Widevine)?;
        Ok(Self::Widevine(widevine::WidevineResolver::new(device, transport)))
    }

    pub fn system_name(&self) -> &'static str {
        match self {
            DrmResolver::Widevine(_) => "Widevine",
            DrmResolver::PlayReady(_) => "PlayReady",
            DrmResolver::Manual(_) => "manual key",
        }
    }

    /// Runs the license exchange for `info`. The transport blocks, so call this
    /// outside of async contexts.
    pub fn resolve_key(&self, info: &ProtectionInfo) -> TsuzuriResult<ResolvedKey> {
        match self {
            DrmResolver::Widevine(resolver) => resolver.resolve_key(info),
            DrmResolver::PlayReady(resolver) => resolver.resolve_key(info),
            DrmResolver::Manual(key) => match info.key_id {
                Some(expected) if expected != key.key_id => Err(TsuzuriError::KeyIdMismatch {
                    expected,
                    actual: key.key_id,
                }),
                _ => Ok(*key),
            },
        }
    }
}
