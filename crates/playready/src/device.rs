use std::path::Path;

use crate::bcert::CertificateChain;
use crate::ecc::EccKey;
use crate::error::{PlayReadyError, PlayReadyResult};
use crate::header::PlayReadyHeader;
use crate::session::Session;

/// A PlayReady client: its certificate chain and the private keys certified by it.
pub struct Device {
    chain: CertificateChain,
    pub(crate) signing_key: EccKey,
    pub(crate) encryption_key: EccKey,
}

impl Device {
    /// The encryption key defaults to the signing key when not given.
    pub fn new(
        chain: Vec<u8>,
        signing_key: &[u8],
        encryption_key: Option<&[u8]>,
    ) -> PlayReadyResult<Self> {
        let chain = CertificateChain::parse(chain)?;
        let signing_key = EccKey::from_bytes(signing_key)?;
        let encryption_key = match encryption_key {
            Some(key) => EccKey::from_bytes(key)?,
            None => signing_key.clone(),
        };

        if !chain.leaf().has_key(&signing_key.public_bytes()) {
            return Err(PlayReadyError::KeyNotCertified);
        }
        if !chain.leaf().has_key(&encryption_key.public_bytes()) {
            log::warn!("Encryption key is not listed in the leaf certificate");
        }

        Ok(Self {
            chain,
            signing_key,
            encryption_key,
        })
    }

    pub fn from_files<P: AsRef<Path>>(
        chain: P,
        signing_key: P,
        encryption_key: Option<P>,
    ) -> PlayReadyResult<Self> {
        let chain = std::fs::read(chain)?;
        let signing_key = std::fs::read(signing_key)?;
        let encryption_key = encryption_key.map(std::fs::read).transpose()?;
        Self::new(chain, &signing_key, encryption_key.as_deref())
    }

    pub fn certificate_chain(&self) -> &CertificateChain {
        &self.chain
    }

    pub fn open(&self, header: PlayReadyHeader) -> Session<'_> {
        Session::new(self, header)
    }
}
