pub mod protocol;

pub mod constants;
pub mod device;
pub mod key;
pub mod pssh;
pub mod session;

mod base64;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use device::Device;
pub use key::WidevineKey;
pub use pssh::WidevineInitData;
pub use session::Session;
