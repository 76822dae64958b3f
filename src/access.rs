//! Decryption permissions for ciphertext handles.

use serde::{Deserialize, Serialize};

use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
};

use crate::{
    encrypted::{DecryptionOracle, EncryptedValue, FheError, Handle},
    principal::Principal,
};

/// Target of a decryption grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grantee {
    /// Anyone may decrypt.
    Public,
    Principal(Principal),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HandleGrants {
    #[serde(default)]
    public: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    principals: BTreeSet<Principal>,
}

/// Additive, never-revoked decryption grants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControl {
    grants: BTreeMap<Handle, HandleGrants>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a decryption permission. Idempotent.
    pub fn grant(&mut self, handle: Handle, grantee: Grantee) {
        let grants = self.grants.entry(handle).or_default();
        match grantee {
            Grantee::Public => grants.public = true,
            Grantee::Principal(principal) => {
                grants.principals.insert(principal);
            }
        }
    }

    /// Checks whether `requester` may decrypt `handle`. A public grant permits everyone,
    /// including [`Grantee::Public`] itself.
    pub fn is_permitted(&self, handle: &Handle, requester: &Grantee) -> bool {
        let Some(grants) = self.grants.get(handle) else {
            return false;
        };
        grants.public
            || match requester {
                Grantee::Public => false,
                Grantee::Principal(principal) => grants.principals.contains(principal),
            }
    }

    /// Requests decryption of `value` from the `oracle` on behalf of `requester`.
    ///
    /// The permission check is performed eagerly; if it fails, the returned future resolves
    /// to [`FheError::PermissionDenied`] without contacting the oracle. Dropping the future
    /// has no side effects.
    pub fn request_decrypt<'a, O>(
        &self,
        oracle: &'a O,
        value: EncryptedValue,
        requester: Grantee,
    ) -> impl Future<Output = Result<u64, FheError>> + 'a
    where
        O: DecryptionOracle + ?Sized,
    {
        let permitted = self.is_permitted(&value.handle(), &requester);
        async move {
            if !permitted {
                return Err(FheError::PermissionDenied {
                    handle: value.handle(),
                });
            }
            let plaintext = oracle.resolve(&value).await?;
            let width = value.width();
            if width.contains(plaintext) {
                Ok(plaintext)
            } else {
                Err(FheError::ValueOutOfRange {
                    value: plaintext,
                    width,
                })
            }
        }
    }
}
