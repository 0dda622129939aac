use std::time::{SystemTime, UNIX_EPOCH};

use aes::cipher::{BlockDecryptMut, KeyIvInit};
use anyhow::{anyhow, bail, Context};
use cbc::cipher::block_padding::Pkcs7;
use cmac::{Cmac, Mac};
use prost::Message;
use sha1::{Digest, Sha1};

use crate::key::WidevineKey;
use crate::protocol::{
    license::key_container::KeyType,
    license_request::content_identification::{
        ContentIdVariant, WidevinePsshData as WidevineMessagePsshData,
    },
    license_request::{self, ContentIdentification},
    signed_message::MessageType,
    License, LicenseRequest, LicenseType, ProtocolVersion, SignedMessage,
};
use crate::pssh::WidevineInitData;

// https://github.com/nilaoda/WVCore/blob/main/Widevine/Session.cs
use super::device::Device;

/// A decoded `LICENSE` message whose keys are still wrapped.
#[derive(Debug, Clone)]
pub struct LicenseResponse {
    license: License,
    session_key: Vec<u8>,
}

impl LicenseResponse {
    pub fn key_count(&self) -> usize {
        self.license.key.len()
    }
}

/// One license exchange for one piece of content.
pub struct Session<'device> {
    device: &'device Device,
    pssh_data: Vec<u8>,
    /// Serialized request that was signed, the context for key derivation.
    signed_request: Option<Vec<u8>>,
}

impl<'d> Session<'d> {
    pub fn new(device: &'d Device, init_data: &WidevineInitData) -> anyhow::Result<Self> {
        let pssh_data = init_data.payload()?;
        // Reject payloads that can never be understood by a license server
        init_data.get_pssh().context("invalid Widevine pssh data")?;

        Ok(Self {
            device,
            pssh_data,
            signed_request: None,
        })
    }

    /// Serialized, unsigned `LicenseRequest`.
    pub fn build_request(&self) -> Vec<u8> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let license_request = LicenseRequest {
            client_id: Some(self.device.client_id().to_vec()),
            content_id: Some(ContentIdentification {
                content_id_variant: Some(ContentIdVariant::WidevinePsshData(
                    WidevineMessagePsshData {
                        pssh_data: vec![self.pssh_data.clone()],
                        license_type: Some(LicenseType::Streaming.into()),
                        request_id: Some({
                            let mut id = [0u8; 16];
                            id[0..4].copy_from_slice(&rand::random::<[u8; 4]>());
                            id[8..16].copy_from_slice(&1u64.to_le_bytes());
                            hex::encode_upper(id).into_bytes()
                        }),
                    },
                )),
            }),
            r#type: Some(license_request::RequestType::New.into()),
            request_time: Some(now),
            protocol_version: Some(ProtocolVersion::Version21.into()),
            key_control_nonce: Some(rand::random()),
        };

        license_request.encode_to_vec()
    }

    /// Wraps `request` in a signed `SignedMessage` and remembers it for key derivation.
    pub fn sign_request(&mut self, request: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        let digest = Sha1::digest(&request);
        let signature = self.device.sign(digest.as_ref())?;

        let message = SignedMessage {
            r#type: Some(MessageType::LicenseRequest.into()),
            msg: Some(request.clone()),
            signature: Some(signature),
            session_key: None,
        };
        self.signed_request = Some(request);

        Ok(message.encode_to_vec())
    }

    pub fn parse_response(&self, response: &[u8]) -> anyhow::Result<LicenseResponse> {
        let message = SignedMessage::decode(response)
            .map_err(|e| anyhow!("license response is not a signed message: {e}"))?;

        match message.r#type.map(MessageType::try_from) {
            Some(Ok(MessageType::License)) => {}
            Some(Ok(other)) => bail!("Expecting a LICENSE message, not a '{other:?}' message."),
            _ => bail!("Expecting a LICENSE message, not an UNKNOWN message."),
        }

        let license = License::decode(message.msg())?;
        let session_key = message
            .session_key
            .ok_or_else(|| anyhow!("license response carries no session key"))?;

        Ok(LicenseResponse {
            license,
            session_key,
        })
    }

    /// Unwraps every key container of `response`.
    pub fn extract_keys(&self, response: &LicenseResponse) -> anyhow::Result<Vec<WidevineKey>> {
        let context = self
            .signed_request
            .as_deref()
            .ok_or_else(|| anyhow!("license request has not been signed"))?;

        let session_key = self.device.decrypt(&response.session_key)?;
        let (enc_context, mac_context) = derive_context(context);
        let (enc_key, _, _) = derive_keys(&enc_context, &mac_context, &session_key)?;

        let mut result_keys = Vec::with_capacity(response.license.key.len());
        for key in &response.license.key {
            let decrypt = cbc::Decryptor::<aes::Aes128>::new_from_slices(&enc_key, key.iv())
                .map_err(|e| anyhow!("invalid key container iv: {e}"))?;
            let result = decrypt
                .decrypt_padded_vec_mut::<Pkcs7>(key.key())
                .map_err(|e| anyhow!("failed to unwrap key: {e}"))?;

            let r#type = key
                .r#type
                .and_then(|t| KeyType::try_from(t).ok())
                .unwrap_or(KeyType::Content);
            log::debug!("license key {}: {:?}", hex::encode(key.id()), r#type);

            result_keys.push(WidevineKey {
                r#type,
                id: key.id().to_vec(),
                key: result,
            });
        }

        Ok(result_keys)
    }

    pub fn get_license_keys(&self, response: &[u8]) -> anyhow::Result<Vec<WidevineKey>> {
        let response = self.parse_response(response)?;
        self.extract_keys(&response)
    }
}

/// Returns 2 Context Data used for computing the AES Encryption and HMAC Keys.
pub(crate) fn derive_context(message: &[u8]) -> (Vec<u8>, Vec<u8>) {
    fn get_enc_context(input: &[u8]) -> Vec<u8> {
        let mut result: Vec<u8> = Vec::with_capacity(10 + 1 + input.len() + 4);
        result.extend_from_slice(b"ENCRYPTION\x00");
        result.extend_from_slice(input);
        let key_size: u32 = 16 * 8; // 128-bit
        result.extend_from_slice(&key_size.to_be_bytes());
        result
    }

    fn get_mac_context(input: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(14 + 1 + input.len() + 4);
        result.extend_from_slice(b"AUTHENTICATION\x00");
        result.extend_from_slice(input);
        let key_size: u32 = 32 * 8 * 2; // 512-bit
        result.extend_from_slice(&key_size.to_be_bytes());
        result
    }

    (get_enc_context(message), get_mac_context(message))
}

pub(crate) fn derive_keys(
    enc_context: &[u8],
    mac_context: &[u8],
    key: &[u8],
) -> anyhow::Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    fn derive(session_key: &[u8], context: &[u8], counter: u8) -> anyhow::Result<Vec<u8>> {
        let mut cmac = Cmac::<aes::Aes128>::new_from_slice(session_key)
            .map_err(|_| anyhow!("session key must be 16 bytes, got {}", session_key.len()))?;
        cmac.update(&[counter]);
        cmac.update(context);
        Ok(cmac.finalize().into_bytes().to_vec())
    }

    let enc_key = derive(key, enc_context, 1)?;

    let mut mac_key_server = derive(key, mac_context, 1)?;
    mac_key_server.append(&mut derive(key, mac_context, 2)?);

    let mut mac_key_client = derive(key, mac_context, 3)?;
    mac_key_client.append(&mut derive(key, mac_context, 4)?);

    Ok((enc_key, mac_key_server, mac_key_client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_device, FakeLicenseServer};

    const KID: [u8; 16] = [0x11; 16];
    const KEY: [u8; 16] = [0x42; 16];

    #[test]
    fn test_license_exchange() {
        let device = test_device();
        let server = FakeLicenseServer::new(device.public_key())
            .with_key(KeyType::Signing, [0x01; 16], [0x02; 16])
            .with_key(KeyType::Content, KID, KEY);

        let init_data = WidevineInitData::from_key_ids(&[KID]);
        let mut session = device.open(&init_data).unwrap();
        let request = session.build_request();
        let signed = session.sign_request(request).unwrap();

        let response = server.respond(&signed).unwrap();
        let keys = session.get_license_keys(&response).unwrap();
        assert_eq!(keys.len(), 2);

        let content = keys.iter().find(|k| k.is_content_key()).unwrap();
        assert_eq!(content.id, KID.to_vec());
        assert_eq!(content.key, KEY.to_vec());
    }

    #[test]
    fn test_request_carries_pssh() {
        let device = test_device();
        let init_data = WidevineInitData::from_key_ids(&[KID]);
        let session = device.open(&init_data).unwrap();

        let request = LicenseRequest::decode(session.build_request().as_slice()).unwrap();
        assert_eq!(request.client_id(), b"tsuzuri-test-client-id");
        let Some(ContentIdVariant::WidevinePsshData(pssh)) = request
            .content_id
            .and_then(|content| content.content_id_variant)
        else {
            panic!("missing pssh data");
        };
        assert_eq!(pssh.pssh_data, vec![init_data.to_vec()]);
    }

    #[test]
    fn test_unsigned_session_cannot_extract() {
        let device = test_device();
        let server = FakeLicenseServer::new(device.public_key()).with_key(KeyType::Content, KID, KEY);
        let init_data = WidevineInitData::from_key_ids(&[KID]);

        let mut signer = device.open(&init_data).unwrap();
        let signed = signer.sign_request(signer.build_request()).unwrap();
        let response = server.respond(&signed).unwrap();

        let session = device.open(&init_data).unwrap();
        assert!(session.get_license_keys(&response).is_err());
    }

    #[test]
    fn test_error_response() {
        let device = test_device();
        let init_data = WidevineInitData::from_key_ids(&[KID]);
        let session = device.open(&init_data).unwrap();

        let response = FakeLicenseServer::error_response();
        let err = session.parse_response(&response).unwrap_err();
        assert!(err.to_string().contains("ErrorResponse"));
    }

    #[test]
    fn test_derive_keys_lengths() {
        let (enc_context, mac_context) = derive_context(b"request");
        assert!(enc_context.starts_with(b"ENCRYPTION\x00request"));
        assert!(mac_context.ends_with(&512u32.to_be_bytes()));

        let (enc, mac_server, mac_client) = derive_keys(&enc_context, &mac_context, &[0u8; 16]).unwrap();
        assert_eq!(enc.len(), 16);
        assert_eq!(mac_server.len(), 32);
        assert_eq!(mac_client.len(), 32);
        assert!(derive_keys(&enc_context, &mac_context, &[0u8; 15]).is_err());
    }
}
