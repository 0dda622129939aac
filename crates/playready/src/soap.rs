//! SOAP envelopes of the `AcquireLicense` exchange.

use aes::cipher::{BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::block_padding::Pkcs7;
use p256::{AffinePoint, PublicKey};
use quick_xml::{events::Event, Reader};
use sha2::{Digest, Sha256};

use crate::constants::CLIENT_VERSION;
use crate::ecc::{elgamal_encrypt, point_x, EccKey};
use crate::error::{PlayReadyError, PlayReadyResult};
use crate::header::PlayReadyHeader;

/// AES key material carried by the session key point.
pub(crate) fn session_cipher(point: &AffinePoint) -> ([u8; 16], [u8; 16]) {
    let x = point_x(point);
    let mut iv = [0u8; 16];
    let mut key = [0u8; 16];
    iv.copy_from_slice(&x[..16]);
    key.copy_from_slice(&x[16..]);
    (iv, key)
}

pub(crate) struct LicenseAcquisition<'a> {
    pub header: &'a PlayReadyHeader,
    pub certificate_chain: &'a [u8],
    pub server_key: &'a PublicKey,
    pub session_key: &'a AffinePoint,
    pub nonce: [u8; 16],
    pub client_time: u64,
}

impl LicenseAcquisition<'_> {
    /// The `LA` element, which is the signed part of the challenge.
    pub fn to_xml(&self) -> String {
        let (iv, key) = session_cipher(self.session_key);
        let data = format!(
            "<Data><CertificateChains><CertificateChain>{}</CertificateChain></CertificateChains></Data>",
            STANDARD.encode(self.certificate_chain)
        );
        let encryptor = cbc::Encryptor::<aes::Aes128>::new(&key.into(), &iv.into());
        let mut encrypted = iv.to_vec();
        encrypted.extend(encryptor.encrypt_padded_vec_mut::<Pkcs7>(data.as_bytes()));

        let encrypted_key = elgamal_encrypt(self.server_key, self.session_key);

        format!(
            concat!(
                r#"<LA xmlns="http://schemas.microsoft.com/DRM/2007/03/protocols" Id="SignedData" xml:space="preserve">"#,
                "<Version>1</Version>",
                "<ContentHeader>{header}</ContentHeader>",
                "<CLIENTINFO><CLIENTVERSION>{client_version}</CLIENTVERSION></CLIENTINFO>",
                "<LicenseNonce>{nonce}</LicenseNonce>",
                "<ClientTime>{client_time}</ClientTime>",
                r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#" Type="http://www.w3.org/2001/04/xmlenc#Element">"#,
                r#"<EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"></EncryptionMethod>"#,
                r#"<KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#">"#,
                r#"<EncryptedKey xmlns="http://www.w3.org/2001/04/xmlenc#">"#,
                r#"<EncryptionMethod Algorithm="http://schemas.microsoft.com/DRM/2007/03/protocols#ecc256"></EncryptionMethod>"#,
                r#"<KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#"><KeyName>WMRMServer</KeyName></KeyInfo>"#,
                "<CipherData><CipherValue>{encrypted_key}</CipherValue></CipherData>",
                "</EncryptedKey></KeyInfo>",
                "<CipherData><CipherValue>{encrypted_data}</CipherValue></CipherData>",
                "</EncryptedData></LA>"
            ),
            header = self.header.as_xml(),
            client_version = CLIENT_VERSION,
            nonce = STANDARD.encode(self.nonce),
            client_time = self.client_time,
            encrypted_key = STANDARD.encode(encrypted_key),
            encrypted_data = STANDARD.encode(encrypted),
        )
    }
}

fn signed_info(la: &str) -> String {
    let digest = Sha256::digest(la.as_bytes());
    format!(
        concat!(
            r#"<SignedInfo xmlns="http://www.w3.org/2000/09/xmldsig#">"#,
            r#"<CanonicalizationMethod Algorithm="http://www.w3.org/TR/2001/REC-xml-c14n-20010315"></CanonicalizationMethod>"#,
            r#"<SignatureMethod Algorithm="http://schemas.microsoft.com/DRM/2007/03/protocols#ecdsa-sha256"></SignatureMethod>"#,
            r##"<Reference URI="#SignedData">"##,
            r#"<DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"></DigestMethod>"#,
            "<DigestValue>{}</DigestValue>",
            "</Reference></SignedInfo>"
        ),
        STANDARD.encode(digest)
    )
}

/// Wraps a signed `LA` into the `AcquireLicense` envelope.
pub(crate) fn envelope(la: &str, signing_key: &EccKey) -> String {
    let signed_info = signed_info(la);
    let signature = signing_key.sign(signed_info.as_bytes());

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
            "<soap:Body>",
            r#"<AcquireLicense xmlns="http://schemas.microsoft.com/DRM/2007/03/protocols">"#,
            "<challenge>",
            r#"<Challenge xmlns="http://schemas.microsoft.com/DRM/2007/03/protocols/messages">"#,
            "{la}",
            r#"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#">"#,
            "{signed_info}",
            "<SignatureValue>{signature}</SignatureValue>",
            r#"<KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#"><KeyValue><ECCKeyValue>"#,
            "<PublicKey>{public_key}</PublicKey>",
            "</ECCKeyValue></KeyValue></KeyInfo>",
            "</Signature></Challenge></challenge></AcquireLicense></soap:Body></soap:Envelope>"
        ),
        la = la,
        signed_info = signed_info,
        signature = STANDARD.encode(signature),
        public_key = STANDARD.encode(signing_key.public_bytes()),
    )
}

/// Text content of every element named `name`, ignoring namespaces.
pub(crate) fn element_texts(xml: &str, name: &str) -> PlayReadyResult<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut texts = Vec::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == name.as_bytes() => {
                current = Some(String::new());
            }
            Event::Text(text) => {
                if let Some(current) = current.as_mut() {
                    current.push_str(&text.unescape()?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == name.as_bytes() => {
                if let Some(text) = current.take() {
                    texts.push(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(texts)
}

/// Decoded XMR blobs of an `AcquireLicenseResponse`.
pub(crate) fn licenses(response: &[u8]) -> PlayReadyResult<Vec<Vec<u8>>> {
    let response = String::from_utf8_lossy(response);

    if let Some(fault) = element_texts(&response, "faultstring")?.into_iter().next() {
        return Err(PlayReadyError::Fault(fault.trim().to_string()));
    }

    let licenses = element_texts(&response, "License")?
        .into_iter()
        .map(|text| STANDARD.decode(text.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    if licenses.is_empty() {
        return Err(PlayReadyError::MissingLicense);
    }
    Ok(licenses)
}
