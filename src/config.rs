//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::principal::Principal;

/// Policy deciding who may close a poll and when.
///
/// Independently of the policy, a poll can never be closed before its start time
/// or closed twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosePolicy {
    /// Only the poll creator, at any time once the poll has started.
    #[default]
    Owner,
    /// Any principal, but only after the poll end time.
    AnyoneAfterEnd,
    /// The creator at any time once started, or anyone after the end time.
    OwnerOrAnyoneAfterEnd,
    /// Any principal at any time once the poll has started.
    Anyone,
}

impl ClosePolicy {
    pub(crate) fn permits(self, caller: &Principal, creator: &Principal, expired: bool) -> bool {
        let is_owner = caller == creator;
        match self {
            Self::Owner => is_owner,
            Self::AnyoneAfterEnd => expired,
            Self::OwnerOrAnyoneAfterEnd => is_owner || expired,
            Self::Anyone => true,
        }
    }
}

/// Configuration of a [`PollEngine`](crate::PollEngine).
///
/// Ballots and tallies always have the [`TALLY_WIDTH`](crate::poll::TALLY_WIDTH) width;
/// it is not configurable, so counts never wrap at a narrower width.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub close_policy: ClosePolicy,
}

impl EngineConfig {
    /// Parses configuration from JSON. Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is malformed, contains unknown fields or unknown enum variants.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
