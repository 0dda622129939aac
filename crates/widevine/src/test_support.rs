//! An in-process license server for tests.

use aes::cipher::{BlockEncryptMut, KeyIvInit};
use anyhow::{anyhow, bail};
use cbc::cipher::block_padding::Pkcs7;
use prost::Message;
use rsa::{Oaep, Pss, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::protocol::{
    license::{key_container::KeyType, KeyContainer},
    signed_message::MessageType,
    License, SignedMessage,
};
use crate::session::{derive_context, derive_keys};
use crate::Device;

/// A device backed by the key material in `testdata/`.
pub fn test_device() -> Device {
    Device::new_static(
        include_bytes!("../testdata/client_id.bin"),
        include_str!("../testdata/private_key.pem"),
    )
    .expect("testdata device must load")
}

/// Issues licenses for a single device public key.
pub struct FakeLicenseServer {
    public_key: RsaPublicKey,
    keys: Vec<(KeyType, [u8; 16], [u8; 16])>,
}

impl FakeLicenseServer {
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self {
            public_key,
            keys: Vec::new(),
        }
    }

    pub fn with_key(mut self, r#type: KeyType, id: [u8; 16], key: [u8; 16]) -> Self {
        self.keys.push((r#type, id, key));
        self
    }

    /// Verifies a signed license request and answers with a license for every configured key.
    pub fn respond(&self, request: &[u8]) -> anyhow::Result<Vec<u8>> {
        let request = SignedMessage::decode(request)?;
        if request.r#type != Some(MessageType::LicenseRequest.into()) {
            bail!("not a license request");
        }
        let msg = request.msg();
        let digest = Sha1::digest(msg);
        self.public_key
            .verify(Pss::new::<Sha1>(), digest.as_ref(), request.signature())
            .map_err(|e| anyhow!("bad request signature: {e}"))?;

        let session_key: [u8; 16] = rand::random();
        let mut rng = rand::thread_rng();
        let wrapped_session_key =
            self.public_key
                .encrypt(&mut rng, Oaep::new::<Sha1>(), &session_key)?;

        let (enc_context, mac_context) = derive_context(msg);
        let (enc_key, _, _) = derive_keys(&enc_context, &mac_context, &session_key)?;

        let mut containers = Vec::with_capacity(self.keys.len());
        for (r#type, id, key) in &self.keys {
            let iv: [u8; 16] = rand::random();
            let encrypt = cbc::Encryptor::<aes::Aes128>::new_from_slices(&enc_key, &iv)
                .map_err(|e| anyhow!("{e}"))?;
            containers.push(KeyContainer {
                id: Some(id.to_vec()),
                iv: Some(iv.to_vec()),
                key: Some(encrypt.encrypt_padded_vec_mut::<Pkcs7>(key)),
                r#type: Some((*r#type).into()),
            });
        }

        let license = License { key: containers };
        Ok(SignedMessage {
            r#type: Some(MessageType::License.into()),
            msg: Some(license.encode_to_vec()),
            signature: None,
            session_key: Some(wrapped_session_key),
        }
        .encode_to_vec())
    }

    /// A response that is well formed but refuses the request.
    pub fn error_response() -> Vec<u8> {
        SignedMessage {
            r#type: Some(MessageType::ErrorResponse.into()),
            msg: Some(Vec::new()),
            signature: None,
            session_key: None,
        }
        .encode_to_vec()
    }
}
