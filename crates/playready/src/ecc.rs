//! ECC-256 primitives: ECDSA signing and the ElGamal scheme used to wrap keys.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{AffinePoint, EncodedPoint, NonZeroScalar, ProjectivePoint, PublicKey, SecretKey};

use crate::error::{PlayReadyError, PlayReadyResult};

/// A P-256 private key.
#[derive(Clone)]
pub struct EccKey {
    secret: SecretKey,
}

impl EccKey {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Reads a raw 32-byte private scalar. Key files that append the public
    /// key (96 bytes in total) are accepted as well.
    pub fn from_bytes(data: &[u8]) -> PlayReadyResult<Self> {
        let scalar = match data.len() {
            32 | 96 => &data[..32],
            len => {
                return Err(PlayReadyError::InvalidKey(format!(
                    "expected 32 or 96 bytes, got {len}"
                )))
            }
        };
        let secret = SecretKey::from_slice(scalar)
            .map_err(|e| PlayReadyError::InvalidKey(e.to_string()))?;
        Ok(Self { secret })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut output = [0u8; 32];
        output.copy_from_slice(&self.secret.to_bytes());
        output
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    /// Uncompressed public key coordinates, `x || y`.
    pub fn public_bytes(&self) -> [u8; 64] {
        point_to_bytes(self.public_key().as_affine())
    }

    /// ECDSA-SHA256 signature in raw `r || s` form.
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key.sign(data);
        let mut output = [0u8; 64];
        output.copy_from_slice(&signature.to_bytes());
        output
    }

    /// Recovers the point wrapped by [`elgamal_encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> PlayReadyResult<AffinePoint> {
        if ciphertext.len() != 128 {
            return Err(PlayReadyError::InvalidKey(format!(
                "ElGamal ciphertext must be 128 bytes, got {}",
                ciphertext.len()
            )));
        }
        let c1 = ProjectivePoint::from(point_from_bytes(&ciphertext[..64])?);
        let c2 = ProjectivePoint::from(point_from_bytes(&ciphertext[64..])?);

        let d = *self.secret.to_nonzero_scalar();
        Ok((c2 - c1 * d).to_affine())
    }
}

/// Wraps `message` for `public`: `C1 = kG`, `C2 = M + kQ`.
pub fn elgamal_encrypt(public: &PublicKey, message: &AffinePoint) -> [u8; 128] {
    let k = NonZeroScalar::random(&mut OsRng);
    let c1 = (ProjectivePoint::GENERATOR * *k).to_affine();
    let c2 = (ProjectivePoint::from(*message) + ProjectivePoint::from(*public.as_affine()) * *k)
        .to_affine();

    let mut output = [0u8; 128];
    output[..64].copy_from_slice(&point_to_bytes(&c1));
    output[64..].copy_from_slice(&point_to_bytes(&c2));
    output
}

/// A random curve point, used as the session key carrier.
pub fn random_point() -> AffinePoint {
    let k = NonZeroScalar::random(&mut OsRng);
    (ProjectivePoint::GENERATOR * *k).to_affine()
}

pub fn point_to_bytes(point: &AffinePoint) -> [u8; 64] {
    let encoded = point.to_encoded_point(false);
    let mut output = [0u8; 64];
    // The identity has no coordinates and stays zeroed
    if let (Some(x), Some(y)) = (encoded.x(), encoded.y()) {
        output[..32].copy_from_slice(x);
        output[32..].copy_from_slice(y);
    }
    output
}

/// The x coordinate of `point`.
pub fn point_x(point: &AffinePoint) -> [u8; 32] {
    let mut x = [0u8; 32];
    x.copy_from_slice(&point_to_bytes(point)[..32]);
    x
}

pub fn point_from_bytes(data: &[u8]) -> PlayReadyResult<AffinePoint> {
    if data.len() != 64 {
        return Err(PlayReadyError::InvalidKey(format!(
            "curve point must be 64 bytes, got {}",
            data.len()
        )));
    }
    let encoded = EncodedPoint::from_affine_coordinates(
        data[..32].into(),
        data[32..].into(),
        false,
    );
    Option::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| PlayReadyError::InvalidKey("point is not on the curve".to_string()))
}

pub fn public_key_from_bytes(data: &[u8]) -> PlayReadyResult<PublicKey> {
    PublicKey::from_affine(point_from_bytes(data)?)
        .map_err(|e| PlayReadyError::InvalidKey(e.to_string()))
}

pub fn verify(public: &PublicKey, data: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    VerifyingKey::from(public).verify(data, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elgamal_round_trip() {
        let key = EccKey::generate();
        let message = random_point();

        let ciphertext = elgamal_encrypt(&key.public_key(), &message);
        assert_eq!(key.decrypt(&ciphertext).unwrap(), message);

        let other = EccKey::generate();
        assert_ne!(other.decrypt(&ciphertext).unwrap(), message);
    }

    #[test]
    fn test_sign_and_verify() {
        let key = EccKey::generate();
        let signature = key.sign(b"payload");
        assert!(verify(&key.public_key(), b"payload", &signature));
        assert!(!verify(&key.public_key(), b"tampered", &signature));
    }

    #[test]
    fn test_key_file_lengths() {
        let key = EccKey::generate();
        let mut file = key.to_bytes().to_vec();
        assert_eq!(EccKey::from_bytes(&file).unwrap().public_bytes(), key.public_bytes());

        file.extend_from_slice(&key.public_bytes());
        assert_eq!(EccKey::from_bytes(&file).unwrap().public_bytes(), key.public_bytes());

        assert!(EccKey::from_bytes(&file[..40]).is_err());
    }

    #[test]
    fn test_public_key_bytes() {
        let key = EccKey::generate();
        let public = public_key_from_bytes(&key.public_bytes()).unwrap();
        assert_eq!(public, key.public_key());
        assert!(point_from_bytes(&[0u8; 64]).is_err());
    }
}
