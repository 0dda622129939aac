use std::sync::Arc;

use anyhow::anyhow;
use tsuzuri_widevine::{session::LicenseResponse, Device, Session, WidevineInitData};

use super::{select_key, LicenseExchange, LicenseProtocol, LicenseTransport, ResolvedKey};
use crate::{
    protection::{DrmSystem, KeyId, ProtectionInfo},
    TsuzuriError, TsuzuriResult,
};

pub struct WidevineResolver {
    device: Device,
    transport: Arc<dyn LicenseTransport>,
}

impl WidevineResolver {
    pub fn new(device: Device, transport: Arc<dyn LicenseTransport>) -> Self {
        Self { device, transport }
    }

    pub fn resolve_key(&self, info: &ProtectionInfo) -> TsuzuriResult<ResolvedKey> {
        let init_data = match (info.pssh_for(DrmSystem::Widevine), info.key_id) {
            (Some(pssh), _) => WidevineInitData::new(pssh.to_vec()),
            (None, Some(key_id)) => {
                tracing::debug!("No Widevine pssh, requesting a license for {key_id}");
                WidevineInitData::from_key_ids(&[*key_id.as_bytes()])
            }
            (None, None) => return Err(TsuzuriError::UnknownKeyId),
        };

        // A pssh naming exactly one key identifies the key to pick
        let key_id = info.key_id.or_else(|| match init_data.key_ids().ok()?.as_slice() {
            [only] => Some(KeyId(*only)),
            _ => None,
        });

        let protocol = WidevineProtocol {
            device: &self.device,
            init_data,
            key_id,
            session: None,
        };
        LicenseExchange::new(protocol, self.transport.as_ref()).run()
    }
}

struct WidevineProtocol<'d> {
    device: &'d Device,
    init_data: WidevineInitData,
    key_id: Option<KeyId>,
    session: Option<Session<'d>>,
}

impl<'d> WidevineProtocol<'d> {
    fn session(&mut self) -> TsuzuriResult<&mut Session<'d>> {
        self.session
            .as_mut()
            .ok_or_else(|| TsuzuriError::Widevine(anyhow!("license request has not been built")))
    }
}

impl LicenseProtocol for WidevineProtocol<'_> {
    type Response = LicenseResponse;

    fn build_request(&mut self) -> TsuzuriResult<Vec<u8>> {
        let session = self
            .device
            .open(&self.init_data)
            .map_err(TsuzuriError::Widevine)?;
        let request = session.build_request();
        self.session = Some(session);
        Ok(request)
    }

    fn sign(&mut self, request: Vec<u8>) -> TsuzuriResult<Vec<u8>> {
        self.session()?
            .sign_request(request)
            .map_err(TsuzuriError::Widevine)
    }

    fn parse_response(&mut self, response: &[u8]) -> TsuzuriResult<LicenseResponse> {
        let response = self
            .session()?
            .parse_response(response)
            .map_err(TsuzuriError::Widevine)?;
        tracing::debug!("Widevine license carries {} keys", response.key_count());
        Ok(response)
    }

    fn extract_key(&mut self, response: LicenseResponse) -> TsuzuriResult<ResolvedKey> {
        let key_id = self.key_id;
        let keys = self
            .session()?
            .extract_keys(&response)
            .map_err(TsuzuriError::Widevine)?;

        let content_keys = keys
            .into_iter()
            .filter(|k| k.is_content_key())
            .filter_map(|k| {
                let id = KeyId::from_slice(&k.id).ok()?;
                let key: [u8; 16] = k.key.as_slice().try_into().ok()?;
                Some((id, key))
            });
        select_key(key_id, content_keys)
    }
}
