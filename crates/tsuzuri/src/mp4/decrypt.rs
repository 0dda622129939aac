use std::collections::HashMap;

use crate::{drm::ResolvedKey, TsuzuriError, TsuzuriResult};

/// Decrypts the samples of one media segment.
pub trait SampleDecryptor: Send + Sync {
    /// `init` is the original (still protected) initialization segment which
    /// describes the tracks of `segment`.
    fn decrypt(&self, init: Option<&[u8]>, segment: &[u8], key: &ResolvedKey) -> TsuzuriResult<Vec<u8>>;
}

/// CENC/CBCS decryption through Bento4's `mp4decrypt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4Decrypt;

impl SampleDecryptor for Mp4Decrypt {
    fn decrypt(&self, init: Option<&[u8]>, segment: &[u8], key: &ResolvedKey) -> TsuzuriResult<Vec<u8>> {
        let mut keys = HashMap::with_capacity(1);
        keys.insert(key.key_id.to_hex(), key.key.to_hex());

        mp4decrypt::mp4decrypt(segment, &keys, init)
            .map_err(|e| TsuzuriError::Mp4DecryptError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::tests::make_box;

    fn key() -> ResolvedKey {
        "00112233445566778899aabbccddeeff:0f0e0d0c0b0a09080706050403020100"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_mp4decrypt_on_clear_data() {
        let mut data = make_box(b"ftyp", b"iso6\x00\x00\x00\x00");
        data.extend(make_box(b"free", &[0u8; 8]));

        // Bento4 either copies the unprotected boxes or reports why it could not
        match Mp4Decrypt.decrypt(None, &data, &key()) {
            Ok(output) => assert!(output.windows(4).any(|w| w == b"ftyp")),
            Err(TsuzuriError::Mp4DecryptError(message)) => {
                assert!(message.starts_with("mp4decrypt-error"), "{message}")
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
