//! Decryption gateway for results of closed polls.

use futures::future;
use serde::{Deserialize, Serialize};
use tracing::debug;

use std::{error::Error as StdError, fmt, future::Future};

use crate::{
    access::Grantee,
    clock::Clock,
    encrypted::{DecryptionOracle, FheBackend, FheError},
    engine::PollEngine,
    poll::{PollId, PollNotFound},
    principal::Principal,
};

/// Plaintext vote counts of a closed poll, in the option order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedTallies {
    pub poll_id: PollId,
    pub counts: Vec<u64>,
}

impl DecryptedTallies {
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Total number of counted ballots. Ballots with an out-of-range choice are not included.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Indices of the options with the most votes. Empty if no votes were counted.
    pub fn leaders(&self) -> Vec<usize> {
        let max = self.counts.iter().copied().max().unwrap_or(0);
        if max == 0 {
            return vec![];
        }
        self.counts
            .iter()
            .enumerate()
            .filter_map(|(idx, &count)| (count == max).then(|| idx))
            .collect()
    }
}

/// Error decrypting poll tallies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptError {
    NotFound(PollId),
    /// Poll is not closed yet, so its tallies are not publicly decryptable.
    ResultsNotPublic,
    /// Oracle failed or the access check did not pass.
    Decryption(FheError),
}

impl fmt::Display for DecryptError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(formatter, "poll {id} does not exist"),
            Self::ResultsNotPublic => formatter.write_str("poll results are not public yet"),
            Self::Decryption(err) => write!(formatter, "cannot decrypt tallies: {err}"),
        }
    }
}

impl StdError for DecryptError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Decryption(err) => Some(err),
            _ => None,
        }
    }
}

impl<B: FheBackend, C: Clock> PollEngine<B, C> {
    /// Decrypts all tallies of a closed poll via the `oracle`.
    ///
    /// Existence and publicity of the poll are checked eagerly; the returned future only
    /// waits for the oracle. Decryption is requested under the public grant, so any
    /// `requester` may learn the results once the poll is closed.
    pub fn decrypt_tallies<'a, O>(
        &self,
        oracle: &'a O,
        poll_id: PollId,
        requester: &Principal,
    ) -> impl Future<Output = Result<DecryptedTallies, DecryptError>> + 'a
    where
        O: DecryptionOracle + ?Sized,
    {
        let access = self.access();
        let requests = self
            .registry()
            .poll(poll_id)
            .map_err(|PollNotFound(id)| DecryptError::NotFound(id))
            .and_then(|poll| {
                if !poll.results_public() {
                    return Err(DecryptError::ResultsNotPublic);
                }
                debug!(poll_id = poll_id.get(), %requester, "requested tally decryption");
                Ok(poll
                    .tallies()
                    .iter()
                    .map(|tally| access.request_decrypt(oracle, *tally, Grantee::Public))
                    .collect::<Vec<_>>())
            });

        async move {
            let counts = future::try_join_all(requests?)
                .await
                .map_err(DecryptError::Decryption)?;
            Ok(DecryptedTallies { poll_id, counts })
        }
    }
}
