//! Encrypted values and the homomorphic capability they are computed with.
//!
//! The engine never sees plaintext votes. All computations on ballots and tallies go through
//! an [`FheBackend`], which is an opaque capability supplied by the embedding system
//! (e.g., a coprocessor of an FHE-enabled chain). Decryption is out-of-band and is modeled
//! by the asynchronous [`DecryptionOracle`].

use async_trait::async_trait;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use std::{error::Error as StdError, fmt};

use crate::{principal::Principal, utils::impl_base64_id};

/// Declared bit width of an encrypted unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Self::U8 => 8,
            Self::U16 => 16,
            Self::U32 => 32,
            Self::U64 => 64,
        }
    }

    /// Largest value representable with this width.
    pub fn max_value(self) -> u64 {
        u64::MAX >> (64 - self.bits())
    }

    /// Checks whether `value` lies in `[0, 2^bits)`.
    pub fn contains(self, value: u64) -> bool {
        value <= self.max_value()
    }
}

impl fmt::Display for Width {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "u{}", self.bits())
    }
}

/// Opaque reference to a ciphertext held by the FHE backend.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle([u8; 32]);

impl Handle {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh handle unlinkable to any other.
    pub fn random<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0_u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl_base64_id!(Handle);

/// Context an encrypted user input is bound to by its validity proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputContext {
    /// Destination of the input (the engine instance).
    pub contract: Principal,
    /// Claimed sender of the input.
    pub sender: Principal,
}

/// Immutable encrypted unsigned integer of a declared [`Width`].
///
/// "Updating" an encrypted value means replacing it with the output of a fresh
/// homomorphic operation; ciphertexts are never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncryptedValue {
    handle: Handle,
    width: Width,
}

impl EncryptedValue {
    /// Wraps a handle produced by a backend. Backends are responsible for the handle
    /// actually referencing a ciphertext of the declared width.
    pub fn from_parts(handle: Handle, width: Width) -> Self {
        Self { handle, width }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn width(&self) -> Width {
        self.width
    }

    /// Produces an encryption of zero.
    pub fn encrypt_zero<B: FheBackend + ?Sized>(backend: &B, width: Width) -> Self {
        backend.trivial_encrypt(0, width)
    }

    /// Converts raw user input into an encrypted value.
    ///
    /// # Errors
    ///
    /// Returns [`FheError::InvalidProof`] if `proof` does not attest that `ciphertext`
    /// encrypts a `width`-bit value produced by `context.sender` for `context.contract`.
    /// Nothing is guaranteed about the encrypted value beyond its width.
    pub fn from_user_input<B: FheBackend + ?Sized>(
        backend: &B,
        ciphertext: &[u8],
        proof: &[u8],
        width: Width,
        context: &InputContext,
    ) -> Result<Self, FheError> {
        let value = backend.verify_input(ciphertext, proof, width, context)?;
        FheError::ensure_width(width, value.width)?;
        Ok(value)
    }

    /// Homomorphically adds two values.
    ///
    /// # Errors
    ///
    /// Returns [`FheError::WidthMismatch`] if the values have different widths.
    pub fn add<B: FheBackend + ?Sized>(&self, backend: &B, other: &Self) -> Result<Self, FheError> {
        FheError::ensure_width(self.width, other.width)?;
        backend.add(self, other)
    }

    /// Obliviously selects `if_equal` if this value encrypts `constant`, and `otherwise`
    /// if it does not.
    ///
    /// # Errors
    ///
    /// Returns [`FheError::WidthMismatch`] if the branches have different widths.
    pub fn eq_select<B: FheBackend + ?Sized>(
        &self,
        backend: &B,
        constant: u64,
        if_equal: &Self,
        otherwise: &Self,
    ) -> Result<Self, FheError> {
        FheError::ensure_width(if_equal.width, otherwise.width)?;
        backend.eq_select(self, constant, if_equal, otherwise)
    }
}

/// Homomorphic computation capability.
///
/// Implementations must not materialize plaintexts while computing. Width compatibility
/// of operands is checked by [`EncryptedValue`] before any method is called.
pub trait FheBackend {
    /// Encrypts a public constant.
    fn trivial_encrypt(&self, value: u64, width: Width) -> EncryptedValue;

    /// Verifies the validity proof for a raw user ciphertext and ingests it.
    fn verify_input(
        &self,
        ciphertext: &[u8],
        proof: &[u8],
        width: Width,
        context: &InputContext,
    ) -> Result<EncryptedValue, FheError>;

    /// Homomorphic addition (wrapping modulo `2^width`).
    fn add(&self, lhs: &EncryptedValue, rhs: &EncryptedValue)
        -> Result<EncryptedValue, FheError>;

    /// Homomorphic `value == constant ? if_equal : otherwise`.
    fn eq_select(
        &self,
        value: &EncryptedValue,
        constant: u64,
        if_equal: &EncryptedValue,
        otherwise: &EncryptedValue,
    ) -> Result<EncryptedValue, FheError>;
}

impl<B: FheBackend + ?Sized> FheBackend for &B {
    fn trivial_encrypt(&self, value: u64, width: Width) -> EncryptedValue {
        (**self).trivial_encrypt(value, width)
    }

    fn verify_input(
        &self,
        ciphertext: &[u8],
        proof: &[u8],
        width: Width,
        context: &InputContext,
    ) -> Result<EncryptedValue, FheError> {
        (**self).verify_input(ciphertext, proof, width, context)
    }

    fn add(
        &self,
        lhs: &EncryptedValue,
        rhs: &EncryptedValue,
    ) -> Result<EncryptedValue, FheError> {
        (**self).add(lhs, rhs)
    }

    fn eq_select(
        &self,
        value: &EncryptedValue,
        constant: u64,
        if_equal: &EncryptedValue,
        otherwise: &EncryptedValue,
    ) -> Result<EncryptedValue, FheError> {
        (**self).eq_select(value, constant, if_equal, otherwise)
    }
}

/// External decryption oracle (e.g., a threshold decryption committee).
///
/// The oracle is only ever invoked after the access check in
/// [`AccessControl::request_decrypt()`](crate::AccessControl::request_decrypt()) succeeds.
#[async_trait]
pub trait DecryptionOracle: Send + Sync {
    /// Resolves a ciphertext handle to its plaintext.
    async fn resolve(&self, value: &EncryptedValue) -> Result<u64, FheError>;
}

/// Errors produced by the homomorphic capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FheError {
    /// Validity proof of a user input does not check out.
    InvalidProof,
    /// Operands have different declared widths.
    WidthMismatch { lhs: Width, rhs: Width },
    /// Requester holds no decryption grant for the handle.
    PermissionDenied { handle: Handle },
    /// Handle is not known to the backend.
    UnknownHandle { handle: Handle },
    /// Decrypted value does not fit into the declared width.
    ValueOutOfRange { value: u64, width: Width },
}

impl fmt::Display for FheError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidProof => formatter.write_str("invalid proof for encrypted input"),
            Self::WidthMismatch { lhs, rhs } => {
                write!(formatter, "mismatched widths of encrypted values: {lhs} vs {rhs}")
            }
            Self::PermissionDenied { handle } => {
                write!(formatter, "decryption of ciphertext {handle} is not permitted")
            }
            Self::UnknownHandle { handle } => write!(formatter, "unknown ciphertext {handle}"),
            Self::ValueOutOfRange { value, width } => {
                write!(formatter, "decrypted value {value} does not fit into {width}")
            }
        }
    }
}

impl StdError for FheError {}

impl FheError {
    fn ensure_width(lhs: Width, rhs: Width) -> Result<(), Self> {
        if lhs == rhs {
            Ok(())
        } else {
            Err(Self::WidthMismatch { lhs, rhs })
        }
    }
}
