//! [`PollRegistry`].

use serde::{Deserialize, Serialize};
use tracing::info;

use std::collections::BTreeSet;

use super::{Poll, PollId, PollNotFound, PollSpec, PollSpecError, TALLY_WIDTH};
use crate::{
    encrypted::{EncryptedValue, FheBackend},
    principal::Principal,
};

/// Append-only collection of polls together with the "has voted" records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "RawRegistry")]
pub struct PollRegistry {
    polls: Vec<Poll>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    voters: BTreeSet<(PollId, Principal)>,
}

#[derive(Deserialize)]
struct RawRegistry {
    polls: Vec<Poll>,
    #[serde(default)]
    voters: BTreeSet<(PollId, Principal)>,
}

impl TryFrom<RawRegistry> for PollRegistry {
    type Error = String;

    fn try_from(raw: RawRegistry) -> Result<Self, Self::Error> {
        for (idx, poll) in raw.polls.iter().enumerate() {
            if poll.id.get() != idx as u64 {
                return Err(format!(
                    "poll at position {idx} has non-sequential ID {}",
                    poll.id
                ));
            }
            if let Some(tally) = poll.tallies.iter().find(|tally| tally.width() != TALLY_WIDTH) {
                return Err(format!(
                    "poll {} has a tally of width {}, expected {TALLY_WIDTH}",
                    poll.id,
                    tally.width()
                ));
            }
            if poll.tallies.len() != poll.spec.options.len() {
                return Err(format!(
                    "poll {} has {} tallies for {} options",
                    poll.id,
                    poll.tallies.len(),
                    poll.spec.options.len()
                ));
            }
        }
        if let Some((poll_id, _)) = raw
            .voters
            .iter()
            .find(|(poll_id, _)| poll_id.get() >= raw.polls.len() as u64)
        {
            return Err(format!("voter record references unknown poll {poll_id}"));
        }

        Ok(Self {
            polls: raw.polls,
            voters: raw.voters,
        })
    }
}

impl PollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `spec` and stores a new poll with all tallies set to encrypted zeros.
    /// Returns ID of the created poll.
    ///
    /// # Errors
    ///
    /// Returns an error if `spec` is invalid; the registry is not modified in this case.
    pub fn create_poll<B: FheBackend + ?Sized>(
        &mut self,
        backend: &B,
        spec: PollSpec,
        creator: Principal,
    ) -> Result<PollId, PollSpecError> {
        let spec = spec.validate()?;
        let id = PollId::new(self.polls.len() as u64);
        let tallies = spec
            .options
            .iter()
            .map(|_| EncryptedValue::encrypt_zero(backend, TALLY_WIDTH))
            .collect();

        info!(
            poll_id = id.get(),
            options = spec.options.len(),
            start_time = spec.start_time,
            end_time = spec.end_time,
            "created poll"
        );
        self.polls.push(Poll::new(id, spec, creator, tallies));
        Ok(id)
    }

    pub fn poll_count(&self) -> u64 {
        self.polls.len() as u64
    }

    /// Gets a poll by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll does not exist.
    pub fn poll(&self, id: PollId) -> Result<&Poll, PollNotFound> {
        usize::try_from(id.get())
            .ok()
            .and_then(|idx| self.polls.get(idx))
            .ok_or(PollNotFound(id))
    }

    pub(crate) fn poll_mut(&mut self, id: PollId) -> Result<&mut Poll, PollNotFound> {
        usize::try_from(id.get())
            .ok()
            .and_then(|idx| self.polls.get_mut(idx))
            .ok_or(PollNotFound(id))
    }

    /// Gets encrypted tallies of a poll in the option order.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll does not exist.
    pub fn encrypted_tallies(&self, id: PollId) -> Result<&[EncryptedValue], PollNotFound> {
        self.poll(id).map(Poll::tallies)
    }

    /// Lists polls in the ID order.
    pub fn polls(&self) -> impl Iterator<Item = &Poll> + '_ {
        self.polls.iter()
    }

    /// Checks whether `voter` has a successful vote in the poll. Returns `false` for unknown polls.
    pub fn has_voted(&self, id: PollId, voter: &Principal) -> bool {
        self.voters.contains(&(id, *voter))
    }

    pub(crate) fn record_vote(&mut self, id: PollId, voter: Principal) {
        let inserted = self.voters.insert((id, voter));
        assert!(inserted, "voter already recorded for poll {id}");
    }
}
