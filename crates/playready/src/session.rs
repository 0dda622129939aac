use std::fmt::{Debug, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

use cmac::{Cmac, Mac};
use p256::{AffinePoint, PublicKey};

use crate::constants::WMRM_SERVER_KEY;
use crate::device::Device;
use crate::ecc::{point_x, public_key_from_bytes, random_point};
use crate::error::{PlayReadyError, PlayReadyResult};
use crate::header::PlayReadyHeader;
use crate::soap::{envelope, licenses, LicenseAcquisition};
use crate::xmr::{XmrLicense, CIPHER_ECC_256};

/// A decrypted content key.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey {
    /// Big endian byte order, as found in `tenc`.
    pub key_id: [u8; 16],
    pub key: [u8; 16],
}

impl Debug for ContentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("key_id", &hex::encode(self.key_id))
            .finish_non_exhaustive()
    }
}

/// One license exchange for the content described by a header.
pub struct Session<'device> {
    device: &'device Device,
    header: PlayReadyHeader,
    server_key: Option<PublicKey>,
    session_key: AffinePoint,
}

impl<'d> Session<'d> {
    pub fn new(device: &'d Device, header: PlayReadyHeader) -> Self {
        Self {
            device,
            header,
            server_key: None,
            session_key: random_point(),
        }
    }

    /// Encrypts the session key to `server_key` instead of the `WMRMServer` key.
    pub fn with_server_key(mut self, server_key: PublicKey) -> Self {
        self.server_key = Some(server_key);
        self
    }

    pub fn header(&self) -> &PlayReadyHeader {
        &self.header
    }

    /// The unsigned license acquisition (`LA`) element.
    pub fn build_request(&self) -> PlayReadyResult<String> {
        let server_key = match &self.server_key {
            Some(key) => key.clone(),
            None => public_key_from_bytes(&WMRM_SERVER_KEY)?,
        };
        let client_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let acquisition = LicenseAcquisition {
            header: &self.header,
            certificate_chain: self.device.certificate_chain().raw(),
            server_key: &server_key,
            session_key: &self.session_key,
            nonce: rand::random(),
            client_time,
        };
        Ok(acquisition.to_xml())
    }

    /// The complete SOAP challenge, signed with the device signing key.
    pub fn sign_request(&self, la: &str) -> Vec<u8> {
        envelope(la, &self.device.signing_key).into_bytes()
    }

    pub fn parse_response(&self, response: &[u8]) -> PlayReadyResult<Vec<XmrLicense>> {
        licenses(response)?
            .into_iter()
            .map(XmrLicense::parse)
            .collect()
    }

    /// Unwraps every content key and checks the integrity of its license.
    pub fn extract_keys(&self, licenses: &[XmrLicense]) -> PlayReadyResult<Vec<ContentKey>> {
        let mut keys = Vec::new();
        for license in licenses {
            for object in &license.content_keys {
                if object.cipher_type != CIPHER_ECC_256 {
                    return Err(PlayReadyError::UnsupportedCipher(object.cipher_type));
                }

                let point = self.device.encryption_key.decrypt(&object.encrypted_key)?;
                let x = point_x(&point);
                let (integrity_key, content_key) = x.split_at(16);

                verify_integrity(license, integrity_key)?;

                let mut key = [0u8; 16];
                key.copy_from_slice(content_key);
                log::debug!("PlayReady license key {}", hex::encode(object.key_id));
                keys.push(ContentKey {
                    key_id: object.key_id,
                    key,
                });
            }
        }
        Ok(keys)
    }

    pub fn get_license_keys(&self, response: &[u8]) -> PlayReadyResult<Vec<ContentKey>> {
        let licenses = self.parse_response(response)?;
        self.extract_keys(&licenses)
    }
}

fn verify_integrity(license: &XmrLicense, integrity_key: &[u8]) -> PlayReadyResult<()> {
    let (Some(signature), Some(signed_data)) = (&license.signature, license.signed_data()) else {
        return Err(PlayReadyError::InvalidLicense(
            "license is not signed".to_string(),
        ));
    };

    let mut cmac = Cmac::<aes::Aes128>::new_from_slice(integrity_key)
        .map_err(|_| PlayReadyError::IntegrityCheckFailed)?;
    cmac.update(signed_data);
    cmac.verify_slice(&signature.signature)
        .map_err(|_| PlayReadyError::IntegrityCheckFailed)
}
