//! [`Principal`] identity type.

use crate::utils::impl_base64_id;

/// Opaque identity of an actor (voter, poll creator or decryption grantee).
///
/// The engine only compares principals for equality; the 32 bytes are typically an address
/// or a public key digest supplied by the embedding system.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Principal([u8; 32]);

impl Principal {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Principal {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl_base64_id!(Principal);
