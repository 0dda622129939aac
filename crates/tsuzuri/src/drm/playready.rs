use std::sync::Arc;

use tsuzuri_playready::{xmr::XmrLicense, Device, PlayReadyHeader, PublicKey, Session};

use super::{ContentKey, LicenseExchange, LicenseProtocol, LicenseTransport, ResolvedKey};
use crate::{
    protection::{DrmSystem, KeyId, ProtectionInfo},
    TsuzuriError, TsuzuriResult,
};

pub struct PlayReadyResolver {
    device: Device,
    transport: Arc<dyn LicenseTransport>,
    server_key: Option<PublicKey>,
}

impl PlayReadyResolver {
    pub fn new(device: Device, transport: Arc<dyn LicenseTransport>) -> Self {
        Self {
            device,
            transport,
            server_key: None,
        }
    }

    /// Encrypt the session key to a license server other than `WMRMServer`.
    pub fn with_server_key(mut self, server_key: PublicKey) -> Self {
        self.server_key = Some(server_key);
        self
    }

    pub fn resolve_key(&self, info: &ProtectionInfo) -> TsuzuriResult<ResolvedKey> {
        let header = match (info.pssh_for(DrmSystem::PlayReady), info.key_id) {
            (Some(pssh), _) => PlayReadyHeader::from_init_data(pssh)?,
            (None, Some(key_id)) => {
                tracing::debug!("No PlayReady header, requesting a license for {key_id}");
                PlayReadyHeader::from_key_id(key_id.as_bytes())
            }
            (None, None) => return Err(TsuzuriError::UnknownKeyId),
        };

        let key_id = match info.key_id {
            Some(key_id) => Some(key_id),
            None => header.key_ids()?.first().map(|kid| KeyId(*kid)),
        };

        let mut session = self.device.open(header);
        if let Some(server_key) = &self.server_key {
            session = session.with_server_key(server_key.clone());
        }

        let protocol = PlayReadyProtocol { session, key_id };
        LicenseExchange::new(protocol, self.transport.as_ref()).run()
    }
}

struct PlayReadyProtocol<'d> {
    session: Session<'d>,
    key_id: Option<KeyId>,
}

impl LicenseProtocol for PlayReadyProtocol<'_> {
    type Response = Vec<XmrLicense>;

    fn build_request(&mut self) -> TsuzuriResult<Vec<u8>> {
        Ok(self.session.build_request()?.into_bytes())
    }

    fn sign(&mut self, request: Vec<u8>) -> TsuzuriResult<Vec<u8>> {
        let la = String::from_utf8(request)
            .map_err(|e| TsuzuriError::InvalidHeader(format!("license acquisition is not UTF-8: {e}")))?;
        Ok(self.session.sign_request(&la))
    }

    fn parse_response(&mut self, response: &[u8]) -> TsuzuriResult<Vec<XmrLicense>> {
        Ok(self.session.parse_response(response)?)
    }

    /// The license must carry exactly the requested key id.
    fn extract_key(&mut self, licenses: Vec<XmrLicense>) -> TsuzuriResult<ResolvedKey> {
        let keys = self.session.extract_keys(&licenses)?;

        let Some(expected) = self.key_id else {
            let key = keys.first().ok_or(TsuzuriError::UnknownKeyId)?;
            return Ok(ResolvedKey {
                key_id: KeyId(key.key_id),
                key: ContentKey::new(key.key)?,
            });
        };

        match keys.iter().find(|k| k.key_id == expected.0) {
            Some(key) => Ok(ResolvedKey {
                key_id: expected,
                key: ContentKey::new(key.key)?,
            }),
            None => match keys.first() {
                Some(other) => Err(TsuzuriError::KeyIdMismatch {
                    expected,
                    actual: KeyId(other.key_id),
                }),
                None => Err(TsuzuriError::KeyNotFound(expected)),
            },
        }
    }
}
