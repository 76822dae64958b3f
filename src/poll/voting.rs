//! Ballots and the oblivious tally update.

use serde::{Deserialize, Serialize};

use std::{error::Error as StdError, fmt};

use super::{PollId, PollStage};
use crate::{
    encrypted::{EncryptedValue, FheBackend, FheError},
    principal::Principal,
    utils::base64_bytes,
};

/// Encrypted choice of a single option index together with its validity proof.
///
/// Ballots are consumed by [`PollEngine::vote()`](crate::PollEngine::vote()) and never stored;
/// their only durable effects are the voter record and the updated tallies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub proof: Vec<u8>,
}

impl Ballot {
    pub fn new(ciphertext: impl Into<Vec<u8>>, proof: impl Into<Vec<u8>>) -> Self {
        Self {
            ciphertext: ciphertext.into(),
            proof: proof.into(),
        }
    }
}

/// Computes tallies with `choice` counted in, without learning which option was chosen.
///
/// Each tally `k` is incremented by `choice == k ? 1 : 0`, evaluated homomorphically.
/// A choice outside `0..tallies.len()` hence increments nothing. The input tallies
/// are left intact; the caller commits the output only if the whole computation succeeds.
pub(crate) fn tally_ballot<B: FheBackend + ?Sized>(
    backend: &B,
    tallies: &[EncryptedValue],
    choice: &EncryptedValue,
) -> Result<Vec<EncryptedValue>, FheError> {
    let width = choice.width();
    let one = backend.trivial_encrypt(1, width);
    let zero = backend.trivial_encrypt(0, width);

    tallies
        .iter()
        .enumerate()
        .map(|(option_idx, tally)| {
            let increment = choice.eq_select(backend, option_idx as u64, &one, &zero)?;
            tally.add(backend, &increment)
        })
        .collect()
}

/// Error casting a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    NotFound(PollId),
    /// Poll is not accepting votes at this time.
    PollNotActive(PollStage),
    AlreadyVoted,
    /// Ballot ciphertext is malformed or its proof is forged.
    InvalidProof(FheError),
    /// Homomorphic tally update failed. Indicates a misconfigured backend.
    Tally(FheError),
}

impl fmt::Display for VoteError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(formatter, "poll {id} does not exist"),
            Self::PollNotActive(stage) => {
                write!(formatter, "poll is not accepting votes: it is {stage}")
            }
            Self::AlreadyVoted => formatter.write_str("already voted"),
            Self::InvalidProof(err) => write!(formatter, "cannot verify ballot: {err}"),
            Self::Tally(err) => write!(formatter, "cannot update tallies: {err}"),
        }
    }
}

impl StdError for VoteError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::NotFound(_) | Self::PollNotActive(_) | Self::AlreadyVoted => None,
            Self::InvalidProof(err) | Self::Tally(err) => Some(err),
        }
    }
}

/// Error closing a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndPollError {
    NotFound(PollId),
    /// Poll has not started yet or is already closed.
    PollNotActive(PollStage),
    /// Close policy does not allow `caller` to close the poll now.
    Unauthorized { caller: Principal },
}

impl fmt::Display for EndPollError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(formatter, "poll {id} does not exist"),
            Self::PollNotActive(stage) => {
                write!(formatter, "poll cannot be closed: it is {stage}")
            }
            Self::Unauthorized { caller } => {
                write!(formatter, "{caller} is not allowed to close the poll")
            }
        }
    }
}

impl StdError for EndPollError {}
