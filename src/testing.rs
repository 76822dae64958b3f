//! In-process FHE backend for tests and demos.
//!
//! [`MockFhe`] keeps plaintexts in memory behind random handles, so it provides
//! no confidentiality whatsoever. It does faithfully model the observable contract
//! of a real backend: every operation yields a fresh handle, inputs are only accepted
//! with a proof bound to the claimed sender and destination, and plaintexts are only
//! reachable through the [`DecryptionOracle`] (or [`MockFhe::decrypt_unchecked()`]).

use async_trait::async_trait;
use merlin::Transcript;
use rand_core::{OsRng, RngCore};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    encrypted::{DecryptionOracle, EncryptedValue, FheBackend, FheError, Handle, InputContext, Width},
    poll::Ballot,
    principal::Principal,
};

const PROOF_LEN: usize = 32;

struct StoredValue {
    plaintext: Secret<u64>,
    width: Width,
}

impl StoredValue {
    fn new(plaintext: u64, width: Width) -> Self {
        Self {
            plaintext: Secret::new(plaintext & width.max_value()),
            width,
        }
    }

    fn get(&self) -> u64 {
        *self.plaintext.expose_secret()
    }
}

#[derive(Default)]
struct MockState {
    values: HashMap<Handle, StoredValue>,
    /// Encrypted inputs produced by `encrypt_input()` keyed by the ciphertext digest.
    inputs: HashMap<Handle, StoredValue>,
}

/// Mock FHE backend and decryption oracle. Clones share the ciphertext store.
#[derive(Clone, Default)]
pub struct MockFhe {
    state: Arc<Mutex<MockState>>,
}

impl fmt::Debug for MockFhe {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        formatter
            .debug_struct("MockFhe")
            .field("values", &state.values.len())
            .field("inputs", &state.inputs.len())
            .finish()
    }
}

impl MockFhe {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self, plaintext: u64, width: Width) -> EncryptedValue {
        let handle = Handle::random(&mut OsRng);
        self.lock()
            .values
            .insert(handle, StoredValue::new(plaintext, width));
        EncryptedValue::from_parts(handle, width)
    }

    fn plaintext(&self, value: &EncryptedValue) -> Result<u64, FheError> {
        let handle = value.handle();
        self.lock()
            .values
            .get(&handle)
            .map(StoredValue::get)
            .ok_or(FheError::UnknownHandle { handle })
    }

    fn input_handle(ciphertext: &[u8]) -> Handle {
        Handle::new(Sha256::digest(ciphertext).into())
    }

    fn input_proof(ciphertext: &[u8], width: Width, context: &InputContext) -> [u8; PROOF_LEN] {
        let mut transcript = Transcript::new(b"encrypted_input");
        transcript.append_message(b"contract", context.contract.as_bytes());
        transcript.append_message(b"sender", context.sender.as_bytes());
        transcript.append_u64(b"width", width.bits().into());
        transcript.append_message(b"ciphertext", ciphertext);
        let mut proof = [0_u8; PROOF_LEN];
        transcript.challenge_bytes(b"proof", &mut proof);
        proof
    }

    /// Encrypts `value` on behalf of `context.sender`, producing a ballot that can be
    /// submitted to `context.contract`.
    ///
    /// `value` is truncated to `width`.
    pub fn encrypt_input(&self, value: u64, width: Width, context: &InputContext) -> Ballot {
        let mut ciphertext = vec![0_u8; 64];
        OsRng.fill_bytes(&mut ciphertext);
        let proof = Self::input_proof(&ciphertext, width, context);

        self.lock()
            .inputs
            .insert(Self::input_handle(&ciphertext), StoredValue::new(value, width));
        Ballot::new(ciphertext, proof.to_vec())
    }

    /// Reads the plaintext bypassing access control. Returns `None` for unknown handles.
    pub fn decrypt_unchecked(&self, value: &EncryptedValue) -> Option<u64> {
        self.plaintext(value).ok()
    }
}

impl FheBackend for MockFhe {
    fn trivial_encrypt(&self, value: u64, width: Width) -> EncryptedValue {
        self.store(value, width)
    }

    fn verify_input(
        &self,
        ciphertext: &[u8],
        proof: &[u8],
        width: Width,
        context: &InputContext,
    ) -> Result<EncryptedValue, FheError> {
        if proof != Self::input_proof(ciphertext, width, context).as_slice() {
            return Err(FheError::InvalidProof);
        }

        let handle = Self::input_handle(ciphertext);
        let mut state = self.lock();
        let plaintext = match state.inputs.get(&handle) {
            Some(input) if input.width == width => input.get(),
            _ => return Err(FheError::InvalidProof),
        };
        state
            .values
            .insert(handle, StoredValue::new(plaintext, width));
        Ok(EncryptedValue::from_parts(handle, width))
    }

    fn add(
        &self,
        lhs: &EncryptedValue,
        rhs: &EncryptedValue,
    ) -> Result<EncryptedValue, FheError> {
        let sum = self.plaintext(lhs)?.wrapping_add(self.plaintext(rhs)?);
        Ok(self.store(sum, lhs.width()))
    }

    fn eq_select(
        &self,
        value: &EncryptedValue,
        constant: u64,
        if_equal: &EncryptedValue,
        otherwise: &EncryptedValue,
    ) -> Result<EncryptedValue, FheError> {
        let selected = if self.plaintext(value)? == constant {
            self.plaintext(if_equal)?
        } else {
            self.plaintext(otherwise)?
        };
        Ok(self.store(selected, if_equal.width()))
    }
}

#[async_trait]
impl DecryptionOracle for MockFhe {
    async fn resolve(&self, value: &EncryptedValue) -> Result<u64, FheError> {
        self.plaintext(value)
    }
}

/// Derives a deterministic principal from a human-readable label.
pub fn principal(label: &str) -> Principal {
    Principal::new(Sha256::digest(label.as_bytes()).into())
}
