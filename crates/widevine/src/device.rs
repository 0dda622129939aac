use std::path::Path;

use rsa::{
    pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey, Oaep, Pss, RsaPrivateKey, RsaPublicKey,
};

use super::{pssh::WidevineInitData, session::Session};

/// A provisioned Widevine client: its identification blob and RSA device key.
pub struct Device {
    client_id: Vec<u8>,
    pub(crate) private_key: RsaPrivateKey,
}

impl Device {
    /// Loads `client_id.bin` and `private_key.pem` from a device directory.
    pub fn new<P>(base: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        Self::from_files(
            base.as_ref().join("client_id.bin"),
            base.as_ref().join("private_key.pem"),
        )
    }

    pub fn from_files<C, K>(client_id: C, private_key: K) -> anyhow::Result<Self>
    where
        C: AsRef<Path>,
        K: AsRef<Path>,
    {
        let client_id = std::fs::read(client_id)?;
        let private_key = std::fs::read_to_string(private_key)?;
        Self::new_static(&client_id, &private_key)
    }

    /// Accepts either a PKCS#1 or a PKCS#8 PEM private key.
    pub fn new_static(client_id: &[u8], private_key: &str) -> anyhow::Result<Self> {
        let private_key = match RsaPrivateKey::from_pkcs1_pem(private_key) {
            Ok(key) => key,
            Err(_) => RsaPrivateKey::from_pkcs8_pem(private_key)?,
        };
        Ok(Self::from_parts(client_id.to_vec(), private_key))
    }

    pub fn from_parts(client_id: Vec<u8>, private_key: RsaPrivateKey) -> Self {
        Self {
            client_id,
            private_key,
        }
    }

    pub fn client_id(&self) -> &[u8] {
        &self.client_id
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    pub fn decrypt(&self, input: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        let padding = Oaep::new::<sha1::Sha1>();
        self.private_key.decrypt(padding, input)
    }

    /// Signs a SHA-1 digest with RSASSA-PSS.
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        let mut rng = rand::thread_rng();
        let padding = Pss::new_blinded::<sha1::Sha1>();
        self.private_key.sign_with_rng(&mut rng, padding, digest)
    }

    pub fn open(&self, init_data: &WidevineInitData) -> anyhow::Result<Session<'_>> {
        Session::new(self, init_data)
    }
}
