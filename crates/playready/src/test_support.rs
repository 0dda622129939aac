//! Generated devices and an in-process license server for tests.

use aes::cipher::{BlockDecryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::block_padding::Pkcs7;
use cmac::{Cmac, Mac};
use p256::PublicKey;
use sha2::{Digest, Sha256};

use crate::bcert::{
    CertificateChain, ATTRIBUTE_BASIC_INFO, ATTRIBUTE_KEY, ATTRIBUTE_SIGNATURE,
    KEY_USAGE_ENCRYPT_KEY, KEY_USAGE_SIGN,
};
use crate::constants::PLAYREADY_SYSTEM_ID;
use crate::ecc::{elgamal_encrypt, public_key_from_bytes, EccKey};
use crate::error::{PlayReadyError, PlayReadyResult};
use crate::soap::{element_texts, session_cipher};
use crate::xmr::{
    CIPHER_ECC_256, FLAG_CONTAINER, OBJECT_CONTENT_KEY, OBJECT_GLOBAL_POLICY_CONTAINER,
    OBJECT_KEY_MATERIAL_CONTAINER, OBJECT_OUTER_CONTAINER, OBJECT_SIGNATURE, XMR_MAGIC,
};
use crate::{guid_swap, Device};

const KEY_USAGE_ISSUER_ALL: u32 = 4;

fn attribute(flags: u16, tag: u16, body: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(8 + body.len());
    output.extend_from_slice(&flags.to_be_bytes());
    output.extend_from_slice(&tag.to_be_bytes());
    output.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
    output.extend_from_slice(body);
    output
}

fn certificate(keys: &[([u8; 64], Vec<u32>)]) -> Vec<u8> {
    let basic_info = attribute(1, ATTRIBUTE_BASIC_INFO, &[0u8; 32]);

    let mut key_body = (keys.len() as u32).to_be_bytes().to_vec();
    for (public_key, usages) in keys {
        key_body.extend_from_slice(&1u16.to_be_bytes()); // ECC-256
        key_body.extend_from_slice(&512u16.to_be_bytes());
        key_body.extend_from_slice(&0u32.to_be_bytes());
        key_body.extend_from_slice(public_key);
        key_body.extend_from_slice(&(usages.len() as u32).to_be_bytes());
        for usage in usages {
            key_body.extend_from_slice(&usage.to_be_bytes());
        }
    }
    let key = attribute(1, ATTRIBUTE_KEY, &key_body);

    let mut signature_body = Vec::new();
    signature_body.extend_from_slice(&1u16.to_be_bytes());
    signature_body.extend_from_slice(&64u16.to_be_bytes());
    signature_body.extend_from_slice(&[0u8; 64]);
    signature_body.extend_from_slice(&512u32.to_be_bytes());
    signature_body.extend_from_slice(&[0u8; 64]);
    let signature = attribute(1, ATTRIBUTE_SIGNATURE, &signature_body);

    let signed_len = 16 + basic_info.len() + key.len();
    let total_len = signed_len + signature.len();
    let mut output = b"CERT".to_vec();
    output.extend_from_slice(&1u32.to_be_bytes());
    output.extend_from_slice(&(total_len as u32).to_be_bytes());
    output.extend_from_slice(&(signed_len as u32).to_be_bytes());
    output.extend(basic_info);
    output.extend(key);
    output.extend(signature);
    output
}

/// A two-certificate chain whose leaf lists `leaf_keys`.
pub fn build_certificate_chain(leaf_keys: &[([u8; 64], Vec<u32>)]) -> Vec<u8> {
    let leaf = certificate(leaf_keys);
    let issuer = certificate(&[(
        EccKey::generate().public_bytes(),
        vec![KEY_USAGE_ISSUER_ALL],
    )]);

    let total_len = 20 + leaf.len() + issuer.len();
    let mut output = b"CHAI".to_vec();
    output.extend_from_slice(&1u32.to_be_bytes());
    output.extend_from_slice(&(total_len as u32).to_be_bytes());
    output.extend_from_slice(&0u32.to_be_bytes());
    output.extend_from_slice(&2u32.to_be_bytes());
    output.extend(leaf);
    output.extend(issuer);
    output
}

/// A PlayReady Object with a single rights management record.
pub fn build_playready_object(header_xml: &str) -> Vec<u8> {
    let record: Vec<u8> = header_xml
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();

    let mut output = Vec::with_capacity(10 + record.len());
    output.extend_from_slice(&((10 + record.len()) as u32).to_le_bytes());
    output.extend_from_slice(&1u16.to_le_bytes());
    output.extend_from_slice(&1u16.to_le_bytes());
    output.extend_from_slice(&(record.len() as u16).to_le_bytes());
    output.extend(record);
    output
}

pub fn build_pssh_box(data: &[u8]) -> Vec<u8> {
    let mut output = ((32 + data.len()) as u32).to_be_bytes().to_vec();
    output.extend_from_slice(b"pssh");
    output.extend_from_slice(&[0, 0, 0, 0]);
    output.extend_from_slice(PLAYREADY_SYSTEM_ID);
    output.extend_from_slice(&(data.len() as u32).to_be_bytes());
    output.extend_from_slice(data);
    output
}

/// Key material as it would be stored on disk.
pub struct DeviceFiles {
    pub chain: Vec<u8>,
    pub signing_key: [u8; 32],
    pub encryption_key: [u8; 32],
}

impl DeviceFiles {
    pub fn generate() -> Self {
        let signing_key = EccKey::generate();
        let encryption_key = EccKey::generate();
        let chain = build_certificate_chain(&[
            (signing_key.public_bytes(), vec![KEY_USAGE_SIGN]),
            (encryption_key.public_bytes(), vec![KEY_USAGE_ENCRYPT_KEY]),
        ]);

        Self {
            chain,
            signing_key: signing_key.to_bytes(),
            encryption_key: encryption_key.to_bytes(),
        }
    }

    pub fn device(&self) -> PlayReadyResult<Device> {
        Device::new(
            self.chain.clone(),
            &self.signing_key,
            Some(self.encryption_key.as_slice()),
        )
    }
}

/// Assembles XMR licenses.
pub struct XmrBuilder {
    rights_id: [u8; 16],
    content_keys: Vec<([u8; 16], Vec<u8>)>,
}

fn object(flags: u16, object_type: u16, body: &[u8]) -> Vec<u8> {
    attribute(flags, object_type, body)
}

impl XmrBuilder {
    pub fn new() -> Self {
        Self {
            rights_id: rand::random(),
            content_keys: Vec::new(),
        }
    }

    /// `key_id` is stored as given, in GUID byte order.
    pub fn content_key(mut self, key_id: [u8; 16], encrypted_key: Vec<u8>) -> Self {
        self.content_keys.push((key_id, encrypted_key));
        self
    }

    /// `sign` receives everything before the signature object and returns a 16-byte signature.
    pub fn build(self, sign: impl FnOnce(&[u8]) -> Vec<u8>) -> Vec<u8> {
        // Minimum security level 150
        let security_level = object(1, 0x0034, &150u16.to_be_bytes());
        let global_policy = object(FLAG_CONTAINER, OBJECT_GLOBAL_POLICY_CONTAINER, &security_level);

        let mut key_objects = Vec::new();
        for (key_id, encrypted_key) in &self.content_keys {
            let mut body = key_id.to_vec();
            body.extend_from_slice(&1u16.to_be_bytes()); // AES-128-CTR
            body.extend_from_slice(&CIPHER_ECC_256.to_be_bytes());
            body.extend_from_slice(&(encrypted_key.len() as u16).to_be_bytes());
            body.extend_from_slice(encrypted_key);
            key_objects.extend(object(1, OBJECT_CONTENT_KEY, &body));
        }
        let key_material = object(FLAG_CONTAINER, OBJECT_KEY_MATERIAL_CONTAINER, &key_objects);

        let signature_len = 8 + 4 + 16;
        let outer_len = 8 + global_policy.len() + key_material.len() + signature_len;

        let mut output = XMR_MAGIC.to_vec();
        output.extend_from_slice(&3u32.to_be_bytes());
        output.extend_from_slice(&self.rights_id);
        output.extend_from_slice(&(FLAG_CONTAINER | 1).to_be_bytes());
        output.extend_from_slice(&OBJECT_OUTER_CONTAINER.to_be_bytes());
        output.extend_from_slice(&(outer_len as u32).to_be_bytes());
        output.extend(global_policy);
        output.extend(key_material);

        let signature = sign(&output);
        let mut body = 1u16.to_be_bytes().to_vec();
        body.extend_from_slice(&(signature.len() as u16).to_be_bytes());
        body.extend(signature);
        output.extend(object(1, OBJECT_SIGNATURE, &body));
        output
    }
}

impl Default for XmrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Answers challenges the way a PlayReady license server does, for known keys.
pub struct FakeLicenseServer {
    server_key: EccKey,
    keys: Vec<([u8; 16], [u8; 16])>,
}

impl FakeLicenseServer {
    pub fn new() -> Self {
        Self {
            server_key: EccKey::generate(),
            keys: Vec::new(),
        }
    }

    /// `key_id` in big endian byte order.
    pub fn with_key(mut self, key_id: [u8; 16], key: [u8; 16]) -> Self {
        self.keys.push((key_id, key));
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.server_key.public_key()
    }

    pub fn respond(&self, challenge: &[u8]) -> PlayReadyResult<Vec<u8>> {
        let invalid = |reason: &str| PlayReadyError::InvalidChallenge(reason.to_string());
        let xml = std::str::from_utf8(challenge).map_err(|_| invalid("not UTF-8"))?;

        let la = slice_element(xml, "<LA ", "</LA>").ok_or_else(|| invalid("missing LA"))?;
        let digest = first_text(xml, "DigestValue")?;
        if STANDARD.decode(digest)? != Sha256::digest(la.as_bytes()).to_vec() {
            return Err(invalid("digest mismatch"));
        }

        let signed_info = slice_element(xml, "<SignedInfo", "</SignedInfo>")
            .ok_or_else(|| invalid("missing SignedInfo"))?;
        let signature = STANDARD.decode(first_text(xml, "SignatureValue")?)?;
        let client_key = public_key_from_bytes(&STANDARD.decode(first_text(xml, "PublicKey")?)?)?;
        if !crate::ecc::verify(&client_key, signed_info.as_bytes(), &signature) {
            return Err(invalid("signature mismatch"));
        }

        let cipher_values = element_texts(la, "CipherValue")?;
        let [encrypted_key, encrypted_data] = cipher_values.as_slice() else {
            return Err(invalid("expected two CipherValue elements"));
        };
        let session_key = self.server_key.decrypt(&STANDARD.decode(encrypted_key)?)?;
        let (iv, key) = session_cipher(&session_key);

        let encrypted_data = STANDARD.decode(encrypted_data)?;
        if encrypted_data.len() < 16 || encrypted_data[..16] != iv {
            return Err(invalid("unexpected EncryptedData iv"));
        }
        let data = cbc::Decryptor::<aes::Aes128>::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&encrypted_data[16..])
            .map_err(|_| invalid("EncryptedData does not decrypt"))?;
        let data = String::from_utf8(data).map_err(|_| invalid("EncryptedData is not UTF-8"))?;

        let chain = CertificateChain::parse(STANDARD.decode(first_text(&data, "CertificateChain")?)?)?;
        let device_key = chain
            .leaf()
            .key_with_usage(KEY_USAGE_ENCRYPT_KEY)
            .ok_or_else(|| invalid("leaf certificate has no encryption key"))?;
        let device_key = public_key_from_bytes(&device_key.public_key)?;

        let mut licenses = String::new();
        for (key_id, key) in &self.keys {
            let xmr = license_for(&device_key, key_id, key);
            licenses.push_str(&format!("<License>{}</License>", STANDARD.encode(xmr)));
        }

        Ok(format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body>"#,
                r#"<AcquireLicenseResponse xmlns="http://schemas.microsoft.com/DRM/2007/03/protocols">"#,
                "<AcquireLicenseResult><Response>",
                r#"<LicenseResponse xmlns="http://schemas.microsoft.com/DRM/2007/03/protocols/messages">"#,
                "<Version>1</Version><Licenses>{}</Licenses>",
                "</LicenseResponse></Response></AcquireLicenseResult>",
                "</AcquireLicenseResponse></soap:Body></soap:Envelope>"
            ),
            licenses
        )
        .into_bytes())
    }

    pub fn fault_response(message: &str) -> Vec<u8> {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body>"#,
                "<soap:Fault><faultcode>soap:Server</faultcode><faultstring>{}</faultstring></soap:Fault>",
                "</soap:Body></soap:Envelope>"
            ),
            message
        )
        .into_bytes()
    }
}

impl Default for FakeLicenseServer {
    fn default() -> Self {
        Self::new()
    }
}

/// One license per key: the integrity key must come from the same decrypted point.
fn license_for(device_key: &PublicKey, key_id: &[u8; 16], key: &[u8; 16]) -> Vec<u8> {
    let (integrity_key, point) = loop {
        let integrity_key: [u8; 16] = rand::random();
        let mut compressed = vec![0x02];
        compressed.extend_from_slice(&integrity_key);
        compressed.extend_from_slice(key);
        if let Ok(point) = PublicKey::from_sec1_bytes(&compressed) {
            break (integrity_key, *point.as_affine());
        }
    };

    XmrBuilder::new()
        .content_key(guid_swap(key_id), elgamal_encrypt(device_key, &point).to_vec())
        .build(|data| {
            let mut cmac = <Cmac<aes::Aes128> as Mac>::new_from_slice(&integrity_key)
                .expect("integrity key is 16 bytes");
            cmac.update(data);
            cmac.finalize().into_bytes().to_vec()
        })
}

fn slice_element<'a>(xml: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = xml.find(open)?;
    let end = xml[start..].find(close)? + start + close.len();
    Some(&xml[start..end])
}

fn first_text(xml: &str, name: &str) -> PlayReadyResult<String> {
    element_texts(xml, name)?
        .into_iter()
        .next()
        .ok_or_else(|| PlayReadyError::InvalidChallenge(format!("missing {name}")))
}
