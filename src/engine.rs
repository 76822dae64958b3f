//! [`PollEngine`]: poll lifecycle and ballot ingestion.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use std::fmt;

use crate::{
    access::{AccessControl, Grantee},
    clock::Clock,
    config::EngineConfig,
    encrypted::{EncryptedValue, FheBackend, InputContext},
    poll::{
        tally_ballot, Ballot, EndPollError, Poll, PollId, PollNotFound, PollRegistry, PollSpec,
        PollSpecError, PollStage, PollSummary, VoteError, TALLY_WIDTH,
    },
    principal::Principal,
};

/// Durable engine state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EngineState {
    registry: PollRegistry,
    access: AccessControl,
}

/// Confidential polling engine.
///
/// Operations are expected to be totally ordered: each `&mut self` call completes
/// with all its state changes (or none of them) before the next one starts. Embedders that
/// process requests concurrently should wrap the engine into a mutex.
pub struct PollEngine<B, C> {
    backend: B,
    clock: C,
    config: EngineConfig,
    /// Identity of the engine; encrypted inputs must be bound to it.
    contract: Principal,
    state: EngineState,
}

impl<B, C> fmt::Debug for PollEngine<B, C> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PollEngine")
            .field("config", &self.config)
            .field("contract", &self.contract)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<B: FheBackend, C: Clock> PollEngine<B, C> {
    pub fn new(backend: B, clock: C, config: EngineConfig, contract: Principal) -> Self {
        Self {
            backend,
            clock,
            config,
            contract,
            state: EngineState::default(),
        }
    }

    /// Restores an engine from the output of [`Self::export_state()`].
    ///
    /// # Errors
    ///
    /// Returns an error if `state_json` is malformed or internally inconsistent.
    pub fn restore(
        backend: B,
        clock: C,
        config: EngineConfig,
        contract: Principal,
        state_json: &str,
    ) -> Result<Self, serde_json::Error> {
        let state = serde_json::from_str(state_json)?;
        Ok(Self {
            backend,
            clock,
            config,
            contract,
            state,
        })
    }

    /// Serializes polls, voter records and decryption grants to JSON.
    ///
    /// # Errors
    ///
    /// Propagates serialization errors.
    pub fn export_state(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.state)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn contract(&self) -> &Principal {
        &self.contract
    }

    pub fn registry(&self) -> &PollRegistry {
        &self.state.registry
    }

    pub fn access(&self) -> &AccessControl {
        &self.state.access
    }

    /// Creates a poll owned by `creator`.
    ///
    /// # Errors
    ///
    /// Returns an error if `spec` is invalid.
    pub fn create_poll(
        &mut self,
        spec: PollSpec,
        creator: Principal,
    ) -> Result<PollId, PollSpecError> {
        self.state
            .registry
            .create_poll(&self.backend, spec, creator)
    }

    pub fn poll_count(&self) -> u64 {
        self.state.registry.poll_count()
    }

    /// Gets a poll by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll does not exist.
    pub fn poll(&self, id: PollId) -> Result<&Poll, PollNotFound> {
        self.state.registry.poll(id)
    }

    /// Gets encrypted tallies of a poll.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll does not exist.
    pub fn encrypted_tallies(&self, id: PollId) -> Result<&[EncryptedValue], PollNotFound> {
        self.state.registry.encrypted_tallies(id)
    }

    pub fn has_voted(&self, id: PollId, voter: &Principal) -> bool {
        self.state.registry.has_voted(id, voter)
    }

    /// Current stage of the poll.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll does not exist.
    pub fn stage(&self, id: PollId) -> Result<PollStage, PollNotFound> {
        let now = self.clock.now();
        self.state.registry.poll(id).map(|poll| poll.stage(now))
    }

    /// Summarizes all polls from the perspective of `viewer`.
    pub fn polls_for(&self, viewer: &Principal) -> Vec<PollSummary> {
        let now = self.clock.now();
        let registry = &self.state.registry;
        registry
            .polls()
            .map(|poll| PollSummary::new(poll, registry.has_voted(poll.id(), viewer), now))
            .collect()
    }

    /// Casts an encrypted vote.
    ///
    /// On success, the tallies are replaced with ones counting the ballot, and `voter`
    /// is recorded as having voted. On failure, nothing changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll does not exist or is not active, if `voter`
    /// has already voted in it, or if the ballot proof does not check out.
    pub fn vote(
        &mut self,
        poll_id: PollId,
        ballot: &Ballot,
        voter: &Principal,
    ) -> Result<(), VoteError> {
        let now = self.clock.now();
        let registry = &self.state.registry;
        let poll = registry
            .poll(poll_id)
            .map_err(|PollNotFound(id)| VoteError::NotFound(id))?;

        let stage = poll.stage(now);
        if stage != PollStage::Active {
            return Err(VoteError::PollNotActive(stage));
        }
        if registry.has_voted(poll_id, voter) {
            return Err(VoteError::AlreadyVoted);
        }

        let context = InputContext {
            contract: self.contract,
            sender: *voter,
        };
        let choice = EncryptedValue::from_user_input(
            &self.backend,
            &ballot.ciphertext,
            &ballot.proof,
            TALLY_WIDTH,
            &context,
        )
        .map_err(|err| {
            warn!(poll_id = poll_id.get(), %err, "rejected ballot");
            VoteError::InvalidProof(err)
        })?;
        let tallies =
            tally_ballot(&self.backend, poll.tallies(), &choice).map_err(VoteError::Tally)?;

        // All fallible work is done; commit.
        let registry = &mut self.state.registry;
        registry
            .poll_mut(poll_id)
            .map_err(|PollNotFound(id)| VoteError::NotFound(id))?
            .replace_tallies(tallies);
        registry.record_vote(poll_id, *voter);
        debug!(poll_id = poll_id.get(), "accepted ballot");
        Ok(())
    }

    /// Closes the poll and makes its tallies publicly decryptable.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll does not exist, has not started, is already closed,
    /// or if the configured [`ClosePolicy`](crate::ClosePolicy) does not permit `caller`
    /// to close it now.
    pub fn end_poll(&mut self, poll_id: PollId, caller: &Principal) -> Result<(), EndPollError> {
        let now = self.clock.now();
        let poll = self
            .state
            .registry
            .poll_mut(poll_id)
            .map_err(|PollNotFound(id)| EndPollError::NotFound(id))?;

        let stage = poll.stage(now);
        let expired = match stage {
            PollStage::Scheduled | PollStage::Closed => {
                return Err(EndPollError::PollNotActive(stage));
            }
            PollStage::Active => false,
            PollStage::AwaitingClose => true,
        };
        if !self
            .config
            .close_policy
            .permits(caller, poll.creator(), expired)
        {
            return Err(EndPollError::Unauthorized { caller: *caller });
        }

        poll.close();
        for tally in poll.tallies() {
            self.state.access.grant(tally.handle(), Grantee::Public);
        }
        info!(poll_id = poll_id.get(), early = !expired, "closed poll");
        Ok(())
    }
}
