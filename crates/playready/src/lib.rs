pub mod bcert;
pub mod constants;
pub mod device;
pub mod ecc;
pub mod error;
pub mod header;
pub mod session;
pub mod xmr;

mod soap;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use device::Device;
pub use error::{PlayReadyError, PlayReadyResult};
pub use header::PlayReadyHeader;
pub use p256::PublicKey;
pub use session::{ContentKey, Session};

/// Swaps a key id between GUID (little endian fields) and big endian byte order.
pub fn guid_swap(kid: &[u8; 16]) -> [u8; 16] {
    let mut out = *kid;
    out[0..4].reverse();
    out[4..6].reverse();
    out[6..8].reverse();
    out
}
