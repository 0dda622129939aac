use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayReadyError {
    #[error("invalid certificate chain: {0}")]
    InvalidCertificateChain(String),
    #[error("invalid ECC key: {0}")]
    InvalidKey(String),
    #[error("the signing key is not certified by the leaf certificate")]
    KeyNotCertified,
    #[error("invalid PlayReady header: {0}")]
    InvalidHeader(String),
    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("license server fault: {0}")]
    Fault(String),
    #[error("license response contains no license")]
    MissingLicense,
    #[error("invalid XMR license: {0}")]
    InvalidLicense(String),
    #[error("unsupported content key cipher type {0}")]
    UnsupportedCipher(u16),
    #[error("license integrity check failed")]
    IntegrityCheckFailed,

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type PlayReadyResult<T> = Result<T, PlayReadyError>;
